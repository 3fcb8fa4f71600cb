//! Shared fixtures: an in-memory Modbus slave on a duplex pipe

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relay_modbus::crc;
use relay_modbus::frame::{build_frame, pack_bits, unpack_bits};
use relayd::config::{RelaydConfig, TransportKind};
use relayd::context::DaemonContext;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const SLAVE: u8 = 1;

/// One request as the device saw it
#[derive(Debug, Clone)]
pub struct SeenFrame {
    pub at: Instant,
    pub bytes: Vec<u8>,
}

impl SeenFrame {
    pub fn function(&self) -> u8 {
        self.bytes[1]
    }

    pub fn address(&self) -> u16 {
        u16::from_be_bytes([self.bytes[2], self.bytes[3]])
    }
}

#[derive(Debug, Default)]
pub struct DeviceState {
    pub coils: Vec<bool>,
    pub inputs: Vec<bool>,
    pub frames: Vec<SeenFrame>,
    /// Flip a CRC bit in the next reply
    pub corrupt_next: bool,
    /// Answer the next request with this exception code
    pub exception_next: Option<u8>,
    /// Swallow requests without answering
    pub silent: bool,
}

#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    /// Spawn a slave on one end of a pipe; the other end is the master's channel
    pub fn spawn(coils: usize, inputs: usize) -> (DuplexStream, MockDevice, JoinHandle<()>) {
        let (master, slave) = tokio::io::duplex(1024);
        let device = MockDevice {
            state: Arc::new(Mutex::new(DeviceState {
                coils: vec![false; coils],
                inputs: vec![false; inputs],
                ..DeviceState::default()
            })),
        };
        let task = tokio::spawn(device.clone().serve(slave));
        (master, device, task)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn frames(&self) -> Vec<SeenFrame> {
        self.state.lock().frames.clone()
    }

    pub fn coil(&self, address: usize) -> bool {
        self.state.lock().coils[address]
    }

    pub fn set_input(&self, address: usize, on: bool) {
        self.state.lock().inputs[address] = on;
    }

    async fn serve(self, mut stream: DuplexStream) {
        loop {
            let Some(request) = read_request(&mut stream).await else {
                break;
            };
            assert!(crc::verify(&request), "master sent bad CRC: {:02X?}", request);

            let reply = {
                let mut state = self.state.lock();
                state.frames.push(SeenFrame {
                    at: Instant::now(),
                    bytes: request.clone(),
                });
                if state.silent {
                    None
                } else {
                    let mut reply = match state.exception_next.take() {
                        Some(code) => build_frame(SLAVE, request[1] | 0x80, &[code]),
                        None => answer(&mut state, &request),
                    };
                    if std::mem::take(&mut state.corrupt_next) {
                        let last = reply.len() - 1;
                        reply[last] ^= 0x01;
                    }
                    Some(reply)
                }
            };

            if let Some(reply) = reply {
                if stream.write_all(&reply).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn read_request(stream: &mut DuplexStream) -> Option<Vec<u8>> {
    let mut frame = vec![0u8; 6];
    stream.read_exact(&mut frame).await.ok()?;
    let tail = if frame[1] == 0x0F {
        let mut count = [0u8; 1];
        stream.read_exact(&mut count).await.ok()?;
        frame.push(count[0]);
        usize::from(count[0]) + 2
    } else {
        2
    };
    let start = frame.len();
    frame.resize(start + tail, 0);
    stream.read_exact(&mut frame[start..]).await.ok()?;
    Some(frame)
}

fn answer(state: &mut DeviceState, request: &[u8]) -> Vec<u8> {
    let function = request[1];
    let first = u16::from_be_bytes([request[2], request[3]]) as usize;
    let word = u16::from_be_bytes([request[4], request[5]]);

    match function {
        0x01 | 0x02 => {
            let bank = if function == 0x01 {
                &state.coils
            } else {
                &state.inputs
            };
            let count = word as usize;
            let Some(bits) = bank.get(first..first + count) else {
                return build_frame(SLAVE, function | 0x80, &[0x02]);
            };
            let packed = pack_bits(bits);
            let mut payload = vec![packed.len() as u8];
            payload.extend_from_slice(&packed);
            build_frame(SLAVE, function, &payload)
        },
        0x05 => match state.coils.get_mut(first) {
            Some(coil) => {
                *coil = word == 0xFF00;
                request.to_vec()
            },
            None => build_frame(SLAVE, 0x85, &[0x02]),
        },
        0x0F => {
            let count = word as usize;
            let values = unpack_bits(&request[7..request.len() - 2], count);
            match state.coils.get_mut(first..first + count) {
                Some(coils) => {
                    coils.copy_from_slice(&values);
                    build_frame(SLAVE, 0x0F, &request[2..6])
                },
                None => build_frame(SLAVE, 0x8F, &[0x02]),
            }
        },
        other => build_frame(SLAVE, other | 0x80, &[0x01]),
    }
}

/// Small device, short timings, sessions on loopback TCP under `runtime_dir`
pub fn test_config(runtime_dir: &Path, relays: u16, inputs: u16) -> RelaydConfig {
    let mut config = RelaydConfig::default();
    config.serial.port = "/dev/ttyMOCK0".to_string();
    config.device.slave_id = SLAVE;
    config.device.relay_count = relays;
    config.device.input_count = inputs;
    config.daemon.transaction_timeout_ms = 1000;
    config.daemon.poll_interval_ms = 500;
    config.daemon.avoidance_window_ms = 200;
    config.daemon.skip_slice_ms = 50;
    config.daemon.transport = TransportKind::Tcp;
    config.daemon.runtime_dir = Some(runtime_dir.to_path_buf());
    config
}

pub struct Harness {
    pub ctx: Arc<DaemonContext>,
    pub worker: JoinHandle<()>,
    pub device: MockDevice,
}

/// Start the serializer against a fresh mock device (no poller, no server)
pub fn start(config: RelaydConfig) -> Harness {
    let (master, device, _task) = MockDevice::spawn(
        usize::from(config.device.relay_count),
        usize::from(config.device.input_count),
    );
    let (ctx, worker) = DaemonContext::start(config, master).unwrap();
    Harness {
        ctx,
        worker,
        device,
    }
}

pub fn relay_frames(frames: &[SeenFrame], function: u8) -> Vec<SeenFrame> {
    frames
        .iter()
        .filter(|f| f.function() == function)
        .cloned()
        .collect()
}

pub const WAIT: Duration = Duration::from_secs(5);
