fn main() {
    // Load .env file for WiFi and bridge endpoint configuration
    load_env_config();

    // Host builds (unit tests) link with the platform default linker
    if is_bare_metal_target() {
        linker_be_nice();
        // make sure linkall.x is the last linker script (otherwise might cause problems with flip-link)
        println!("cargo:rustc-link-arg=-Tlinkall.x");
    }
}

fn is_bare_metal_target() -> bool {
    std::env::var("CARGO_CFG_TARGET_OS").is_ok_and(|os| os == "none")
        && std::env::var_os("CARGO_FEATURE_ESP32S3").is_some()
}

/// Configuration keys exported to the crate, with their fallback values
const ENV_KEYS: [(&str, &str); 5] = [
    ("WIFI_SSID", ""),
    ("WIFI_PASSWORD", ""),
    ("BRIDGE_HOST", "192.168.1.100"),
    ("BRIDGE_PORT", "1880"),
    ("BRIDGE_PATH", "/ws/m5CoreS3"),
];

/// Load environment configuration from .env file
/// Environment variables take priority over .env file values
fn load_env_config() {
    use std::env;
    use std::path::Path;

    // Tell cargo to rerun this build script if .env file changes
    println!("cargo:rerun-if-changed=.env");

    for (key, _) in ENV_KEYS {
        println!("cargo:rerun-if-env-changed={}", key);
    }

    // Try to load .env file if it exists
    if Path::new(".env").exists() {
        match dotenvy::dotenv() {
            Ok(_) => println!("cargo:warning=Loaded .env file"),
            Err(e) => println!("cargo:warning=Failed to load .env file: {}", e),
        }
    }

    for (key, fallback) in ENV_KEYS {
        // Empty strings fall back the same way as unset variables
        let value = env::var(key)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| fallback.to_string());

        println!("cargo:rustc-env={}={}", key, value);
    }

    match env::var("WIFI_SSID") {
        Ok(ssid) if !ssid.trim().is_empty() => {
            println!("cargo:warning=WIFI_SSID configured: {}", ssid.trim());
        }
        _ => println!("cargo:warning=WIFI_SSID is empty - WiFi will not be configured"),
    }

    if env::var("BRIDGE_PORT").is_ok_and(|p| p.trim().parse::<u16>().is_err()) {
        println!("cargo:warning=BRIDGE_PORT is not a valid port number");
    }
}

fn linker_be_nice() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        let kind = &args[1];
        let what = &args[2];

        match kind.as_str() {
            "undefined-symbol" => match what.as_str() {
                "_stack_start" => {
                    eprintln!();
                    eprintln!("💡 Is the linker script `linkall.x` missing?");
                    eprintln!();
                }
                "esp_wifi_preempt_enable"
                | "esp_wifi_preempt_yield_task"
                | "esp_wifi_preempt_task_create" => {
                    eprintln!();
                    eprintln!("💡 `esp-wifi` has no scheduler enabled. Make sure you have the `builtin-scheduler` feature enabled, or that you provide an external scheduler.");
                    eprintln!();
                }
                _ => (),
            },
            // we don't have anything helpful for "missing-lib" yet
            _ => {
                std::process::exit(1);
            }
        }

        std::process::exit(0);
    }

    println!(
        "cargo:rustc-link-arg=--error-handling-script={}",
        std::env::current_exe().unwrap().display()
    );
}
