#![no_std]
#![no_main]

use esp_hal::Blocking;
use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_hal::dma::DmaRxBuf;
use esp_hal::dma_buffers;
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::lcd_cam::LcdCam;
use esp_hal::lcd_cam::cam::{Camera as CamPeripheral, CameraTransfer, Config as CamConfig};
use esp_hal::rng::Rng;
use esp_hal::spi::Mode;
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_println::println;

extern crate alloc;

// WiFi and TCP/IP
use blocking_network_stack::{Socket, Stack};
use embedded_io::{Read, ReadReady, Write};
use esp_wifi::wifi::{
    self, AuthMethod, ClientConfiguration, Configuration, WifiController, WifiDevice,
};
use smoltcp::iface::{SocketSet, SocketStorage};
use smoltcp::wire::{DhcpOption, IpAddress, Ipv4Address};

use gesture_cam_rs::BridgeError;
use gesture_cam_rs::config;
use gesture_cam_rs::connectivity::{ConnectivitySupervisor, WifiLink};
use gesture_cam_rs::gc0308::{FRAME_LEN, FrameGrabber, Gc0308Camera};
use gesture_cam_rs::gesture::GesturePoller;
use gesture_cam_rs::ili9342::Ili9342;
use gesture_cam_rs::paj7620::Paj7620;
use gesture_cam_rs::peripherals::Clock;
use gesture_cam_rs::pipeline::CapturePipeline;
use gesture_cam_rs::scheduler::EventLoop;
use gesture_cam_rs::transcode::JpegTranscoder;
use gesture_cam_rs::ws::{Transport, WsClient};

// Add app descriptor for espflash compatibility
esp_bootloader_esp_idf::esp_app_desc!();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("[PANIC] {}", info);
    loop {}
}

/// Milliseconds since boot
struct UptimeClock;

impl Clock for UptimeClock {
    fn now_ms(&self) -> u64 {
        esp_hal::time::Instant::now()
            .duration_since_epoch()
            .as_millis()
    }
}

/// WiFi station backed by the esp-wifi controller.
///
/// The link only counts as associated once DHCP has configured the
/// interface, since the endpoint is unreachable before that.
struct StationLink<'a> {
    controller: WifiController<'a>,
    stack: &'a Stack<'a, WifiDevice<'a>>,
    started: bool,
}

impl WifiLink for StationLink<'_> {
    fn begin(&mut self, ssid: &str, password: &str) -> Result<(), BridgeError> {
        let client_config = ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| BridgeError::WiFiError)?,
            password: password.try_into().map_err(|_| BridgeError::WiFiError)?,
            auth_method: if password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        };

        self.controller
            .set_configuration(&Configuration::Client(client_config))
            .map_err(|_| BridgeError::WiFiError)?;

        if !self.started {
            self.controller.start().map_err(|_| BridgeError::WiFiError)?;
            self.started = true;
        }
        self.controller.connect().map_err(|_| BridgeError::WiFiError)
    }

    fn is_associated(&mut self) -> bool {
        self.stack.work();
        self.controller.is_connected().unwrap_or(false) && self.stack.is_iface_up()
    }

    fn local_ip(&mut self) -> Option<[u8; 4]> {
        self.stack.work();
        if !self.stack.is_iface_up() {
            return None;
        }
        self.stack.get_ip_info().ok().map(|info| info.ip.octets())
    }
}

/// TCP byte stream for the WebSocket client
struct TcpTransport<'s, 'n> {
    socket: Socket<'s, 'n, WifiDevice<'n>>,
}

impl Transport for TcpTransport<'_, '_> {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), BridgeError> {
        let address: Ipv4Address = host.parse().map_err(|_| BridgeError::TransportError)?;
        self.socket.work();
        self.socket
            .open(IpAddress::Ipv4(address), port)
            .map_err(|_| BridgeError::TransportError)
    }

    fn is_connected(&mut self) -> bool {
        self.socket.work();
        self.socket.is_connected()
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), BridgeError> {
        self.socket
            .write_all(data)
            .map_err(|_| BridgeError::TransportError)?;
        self.socket.flush().map_err(|_| BridgeError::TransportError)
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, BridgeError> {
        self.socket.work();
        match self.socket.read_ready() {
            Ok(true) => self.socket.read(buf).map_err(|_| BridgeError::TransportError),
            Ok(false) => Ok(0),
            Err(_) => Err(BridgeError::TransportError),
        }
    }

    fn close(&mut self) {
        self.socket.disconnect();
    }
}

/// Camera DMA state
enum Capture<'d> {
    Idle(CamPeripheral<'d>, DmaRxBuf),
    Running(CameraTransfer<'d, DmaRxBuf>),
    Ready(CamPeripheral<'d>, DmaRxBuf),
    Faulted,
}

/// LCD_CAM capture engine feeding the GC0308 camera handle
struct LcdCamGrabber<'d> {
    state: Capture<'d>,
}

impl<'d> LcdCamGrabber<'d> {
    fn new(camera: CamPeripheral<'d>, buffer: DmaRxBuf) -> Self {
        Self {
            state: Capture::Idle(camera, buffer),
        }
    }

    fn receive(camera: CamPeripheral<'d>, buffer: DmaRxBuf) -> Capture<'d> {
        match camera.receive(buffer) {
            Ok(transfer) => Capture::Running(transfer),
            Err((e, camera, buffer)) => {
                println!("[CAM] Failed to start capture: {:?}", e);
                Capture::Idle(camera, buffer)
            }
        }
    }
}

impl FrameGrabber for LcdCamGrabber<'_> {
    fn start(&mut self) -> Result<(), BridgeError> {
        if let Capture::Idle(camera, buffer) = core::mem::replace(&mut self.state, Capture::Faulted)
        {
            self.state = Self::receive(camera, buffer);
        }

        match self.state {
            Capture::Running(_) => Ok(()),
            _ => Err(BridgeError::CameraError),
        }
    }

    fn poll_frame(&mut self) -> Option<&[u8]> {
        let done = matches!(&self.state, Capture::Running(transfer) if transfer.is_done());
        if done {
            if let Capture::Running(transfer) = core::mem::replace(&mut self.state, Capture::Faulted)
            {
                let (result, camera, buffer) = transfer.wait();
                self.state = match result {
                    Ok(()) => Capture::Ready(camera, buffer),
                    Err(e) => {
                        println!("[CAM] Capture failed: {:?}", e);
                        Self::receive(camera, buffer)
                    }
                };
            }
        }

        match &self.state {
            Capture::Ready(_, buffer) => Some(buffer.as_slice()),
            _ => None,
        }
    }

    fn release_frame(&mut self) {
        if let Capture::Ready(camera, buffer) = core::mem::replace(&mut self.state, Capture::Faulted)
        {
            self.state = Self::receive(camera, buffer);
        }
    }
}

/// Exclusive SPI device for the panel: chip select wraps every transaction
struct PanelSpi<'d> {
    bus: Spi<'d, Blocking>,
    cs: Output<'d>,
}

impl embedded_hal::spi::ErrorType for PanelSpi<'_> {
    type Error = esp_hal::spi::Error;
}

impl embedded_hal::spi::SpiDevice for PanelSpi<'_> {
    fn transaction(
        &mut self,
        operations: &mut [embedded_hal::spi::Operation<'_, u8>],
    ) -> Result<(), Self::Error> {
        use embedded_hal::spi::{Operation, SpiBus};

        self.cs.set_low();
        let result = operations.iter_mut().try_for_each(|op| match op {
            Operation::Write(data) => SpiBus::write(&mut self.bus, data),
            Operation::Read(data) => SpiBus::read(&mut self.bus, data),
            Operation::Transfer(read, write) => SpiBus::transfer(&mut self.bus, read, write),
            Operation::TransferInPlace(data) => SpiBus::transfer_in_place(&mut self.bus, data),
            Operation::DelayNs(ns) => {
                Delay::new().delay_nanos(*ns);
                Ok(())
            }
        });
        let flushed = SpiBus::flush(&mut self.bus);
        self.cs.set_high();

        result.and(flushed)
    }
}

fn timestamp() -> smoltcp::time::Instant {
    smoltcp::time::Instant::from_micros(
        esp_hal::time::Instant::now()
            .duration_since_epoch()
            .as_micros() as i64,
    )
}

fn create_interface(device: &mut WifiDevice<'_>) -> smoltcp::iface::Interface {
    smoltcp::iface::Interface::new(
        smoltcp::iface::Config::new(smoltcp::wire::HardwareAddress::Ethernet(
            smoltcp::wire::EthernetAddress::from_bytes(&device.mac_address()),
        )),
        device,
        timestamp(),
    )
}

#[esp_hal::main]
fn main() -> ! {
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    // Heap for WiFi, the WebSocket buffers and JPEG output; the frame
    // buffer is a separate DMA region
    esp_alloc::heap_allocator!(size: 112 * 1024);

    esp_println::logger::init_logger(log::LevelFilter::Info);
    println!(
        "[BOOT] gesture-cam {} starting, bridge ws://{}:{}{}",
        gesture_cam_rs::VERSION,
        config::BRIDGE_HOST,
        config::BRIDGE_PORT,
        config::BRIDGE_PATH
    );

    let delay = Delay::new();

    // Initialize WiFi driver
    let timer_group0 = TimerGroup::new(peripherals.TIMG0);
    let mut rng = Rng::new(peripherals.RNG);
    let wifi_init = esp_wifi::init(timer_group0.timer0, rng.clone(), peripherals.RADIO_CLK).unwrap();
    let (wifi_controller, wifi_interfaces) = wifi::new(&wifi_init, peripherals.WIFI).unwrap();
    let mut wifi_device = wifi_interfaces.sta;
    println!("[WIFI] WiFi driver initialized successfully");

    // Blocking smoltcp stack with DHCP
    let iface = create_interface(&mut wifi_device);
    let mut socket_set_entries: [SocketStorage; 3] = Default::default();
    let mut socket_set = SocketSet::new(&mut socket_set_entries[..]);
    let mut dhcp_socket = smoltcp::socket::dhcpv4::Socket::new();
    dhcp_socket.set_outgoing_options(&[DhcpOption {
        kind: 12,
        data: b"gesture-cam",
    }]);
    socket_set.add(dhcp_socket);

    let now = || {
        esp_hal::time::Instant::now()
            .duration_since_epoch()
            .as_millis()
    };
    let stack = Stack::new(iface, wifi_device, socket_set, now, rng.random());

    let mut rx_buffer = [0u8; 2048];
    let mut tx_buffer = [0u8; 4096];
    let socket = stack.get_socket(&mut rx_buffer, &mut tx_buffer);

    let link = StationLink {
        controller: wifi_controller,
        stack: &stack,
        started: false,
    };
    let session = WsClient::new(TcpTransport { socket }, rng.random());
    let supervisor = ConnectivitySupervisor::new(link, session);

    // Display: SPI2 on GPIO36/37, CS GPIO3, DC GPIO35
    let spi = Spi::new(
        peripherals.SPI2,
        SpiConfig::default()
            .with_frequency(Rate::from_mhz(40))
            .with_mode(Mode::_0),
    )
    .unwrap()
    .with_sck(peripherals.GPIO36)
    .with_mosi(peripherals.GPIO37);
    let panel_spi = PanelSpi {
        bus: spi,
        cs: Output::new(peripherals.GPIO3, Level::High, OutputConfig::default()),
    };
    let dc = Output::new(peripherals.GPIO35, Level::Low, OutputConfig::default());
    let display = Ili9342::new(panel_spi, dc, delay);

    // Camera: GC0308 control on the internal I2C bus, pixels over LCD_CAM
    let camera_i2c = I2c::new(
        peripherals.I2C0,
        I2cConfig::default().with_frequency(Rate::from_khz(100)),
    )
    .unwrap()
    .with_sda(peripherals.GPIO12)
    .with_scl(peripherals.GPIO11);

    let lcd_cam = LcdCam::new(peripherals.LCD_CAM);
    let cam = CamPeripheral::new(lcd_cam.cam, peripherals.DMA_CH0, CamConfig::default())
        .unwrap()
        .with_pixel_clock(peripherals.GPIO45)
        .with_vsync(peripherals.GPIO46)
        .with_h_enable(peripherals.GPIO38)
        .with_data0(peripherals.GPIO39)
        .with_data1(peripherals.GPIO40)
        .with_data2(peripherals.GPIO41)
        .with_data3(peripherals.GPIO42)
        .with_data4(peripherals.GPIO15)
        .with_data5(peripherals.GPIO16)
        .with_data6(peripherals.GPIO48)
        .with_data7(peripherals.GPIO47);
    let (rx_dma, rx_descriptors, _, _) = dma_buffers!(FRAME_LEN, 0);
    let frame_buffer = DmaRxBuf::new(rx_descriptors, rx_dma).unwrap();
    let camera = Gc0308Camera::new(camera_i2c, LcdCamGrabber::new(cam, frame_buffer), delay);

    // Gesture sensor on Grove port A
    let gesture_i2c = I2c::new(
        peripherals.I2C1,
        I2cConfig::default().with_frequency(Rate::from_khz(400)),
    )
    .unwrap()
    .with_sda(peripherals.GPIO2)
    .with_scl(peripherals.GPIO1);

    // Streaming toggle button, active low
    let button = Input::new(
        peripherals.GPIO8,
        InputConfig::default().with_pull(Pull::Up),
    );
    println!("[BOOT] Button on GPIO{}", config::BUTTON_PIN);

    let pipeline = CapturePipeline::new(camera, display, JpegTranscoder::new());
    let gestures = GesturePoller::new(Paj7620::new(gesture_i2c));

    let mut event_loop = EventLoop::new(button, pipeline, gestures, supervisor, delay, UptimeClock);

    if let Err(e) = event_loop.start() {
        println!("[BOOT] Startup failed: {}", e);
    }

    event_loop.run()
}
