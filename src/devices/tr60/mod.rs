//! TR-60 serial bridge driver
//!
//! The drive electronics sit behind a small bridge MCU on a serial link.
//! Outbound traffic is command frames built by [`protocol`]; inbound traffic
//! is an unsolicited stream of STATUS snapshots plus PULSE frames for every
//! transoptor edge.
//!
//! One reader thread runs a 2ms loop: it drains the serial buffer, decodes
//! frames, caches the latest STATUS snapshot and posts PULSE ticks into the
//! per-track mailboxes. All sensor reads the engine performs are served from
//! the cached snapshot, so a read never touches the wire.

pub mod protocol;

use crate::config::DeviceConfig;
use crate::core::bridge::{
    AnalogSensors, DeviceHandles, DeviceSupervisor, DriveControl, HeadServo, PulseForwarder,
    PulseTaps,
};
use crate::core::types::{PulseEvent, TrackDrive, TrackSide};
use crate::error::{Error, Result};
use crate::transport::{SerialTransport, Transport};

use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use protocol::{StatusFrame, Tr60Command, Tr60Report};

type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Reader loop period, fast enough that a 1-byte-at-a-time UART never backs up
const RECEIVE_INTERVAL: Duration = Duration::from_millis(2);

/// Cached STATUS snapshots older than this fail sensor reads
const STATUS_STALE_AFTER: Duration = Duration::from_millis(500);

/// Startup deadline for the first STATUS frame
const FIRST_STATUS_TIMEOUT: Duration = Duration::from_secs(3);

/// Silent reader cycles before a link warning (250 cycles = 500ms)
const SILENT_WARN_CYCLES: u32 = 250;

/// Reader cycles between battery log lines (30s)
const BATTERY_LOG_CYCLES: u64 = 15_000;

/// Battery warning threshold, millivolts
const BATTERY_LOW_MV: u16 = 6_500;

/// Unparsed inbound bytes kept across cycles before the buffer is squashed
const RX_BUFFER_CAP: usize = 1024;

/// Latest bridge snapshot shared between the reader thread and the sensor
/// handle
#[derive(Debug, Default)]
struct Tr60State {
    /// Most recent STATUS frame and when it arrived
    status: Option<(StatusFrame, Instant)>,
    /// Total frames decoded since startup
    total_rx_frames: u64,
}

/// Open the serial port named in the config and bring the bridge up.
pub fn create(config: &DeviceConfig) -> Result<DeviceHandles> {
    log::info!(
        "TR60: Opening {} at {} baud",
        config.serial_port,
        config.baud_rate
    );
    let transport = SerialTransport::open(&config.serial_port, config.baud_rate)?;
    with_transport(transport)
}

/// Bring the bridge up over an already-open transport.
///
/// Startup sequence: force the drive stage into a safe state, center the
/// head, start the reader thread, then wait for the first STATUS frame to
/// prove the bridge is alive.
pub fn with_transport<T: Transport + 'static>(transport: T) -> Result<DeviceHandles> {
    let transport: SharedTransport = Arc::new(Mutex::new(Box::new(transport)));
    let state = Arc::new(Mutex::new(Tr60State::default()));
    let shutdown = Arc::new(AtomicBool::new(false));

    log::info!("TR60: Forcing safe state");
    send_flushed(&transport, Tr60Command::DrivePower(false))?;
    send_flushed(&transport, Tr60Command::PulseSense(false))?;
    send_flushed(&transport, Tr60Command::SetSpeedCounts { left: 0, right: 0 })?;
    send_flushed(&transport, Tr60Command::HeadAngle(0))?;

    let (left_tx, left_rx) = bounded(1);
    let (right_tx, right_rx) = bounded(1);

    let reader = {
        let transport = Arc::clone(&transport);
        let state = Arc::clone(&state);
        let shutdown = Arc::clone(&shutdown);
        thread::Builder::new()
            .name("tr60-reader".to_string())
            .spawn(move || reader_loop(transport, state, shutdown, left_tx, right_tx))
            .map_err(|e| Error::Thread(format!("tr60-reader spawn failed: {}", e)))?
    };

    log::info!("TR60: Waiting for first STATUS frame");
    let (reader, frame) = wait_for_first_status(&state, &shutdown, reader)?;
    log::info!(
        "TR60: Bridge is up, battery {:.2}V",
        frame.battery_mv as f32 / 1000.0
    );

    Ok(DeviceHandles {
        drive: Box::new(Tr60Drive {
            transport: Arc::clone(&transport),
        }),
        sensors: Box::new(Tr60Sensors {
            transport: Arc::clone(&transport),
            state: Arc::clone(&state),
            us_triggered_at: None,
        }),
        head: Box::new(Tr60Head {
            transport: Arc::clone(&transport),
        }),
        pulses: PulseTaps {
            left: left_rx,
            right: right_rx,
        },
        supervisor: DeviceSupervisor::new(shutdown, vec![reader]),
    })
}

/// Poll the shared state until the reader has cached a STATUS frame. On
/// timeout the reader thread is stopped before the error is returned.
fn wait_for_first_status(
    state: &Arc<Mutex<Tr60State>>,
    shutdown: &Arc<AtomicBool>,
    reader: thread::JoinHandle<()>,
) -> Result<(thread::JoinHandle<()>, StatusFrame)> {
    let start = Instant::now();
    while start.elapsed() < FIRST_STATUS_TIMEOUT {
        if let Some((frame, _)) = state.lock().status {
            return Ok((reader, frame));
        }
        thread::sleep(Duration::from_millis(20));
    }

    shutdown.store(true, Ordering::Relaxed);
    let _ = reader.join();
    Err(Error::InitializationFailed(format!(
        "TR60 bridge sent no STATUS frame within {:?}",
        FIRST_STATUS_TIMEOUT
    )))
}

/// Encode and write a command without flushing. Runtime commands ride the
/// kernel's transmit buffering.
fn send(transport: &SharedTransport, cmd: Tr60Command) -> Result<()> {
    let packet = cmd.encode();
    log::trace!("TR60: TX CMD={:#04x} {:02X?}", cmd.cmd_id(), &packet);
    let mut transport = transport.lock();
    transport.write(&packet)?;
    Ok(())
}

/// Encode, write and flush a command. Startup only, where ordering against
/// the bridge's boot matters.
fn send_flushed(transport: &SharedTransport, cmd: Tr60Command) -> Result<()> {
    let packet = cmd.encode();
    let mut transport = transport.lock();
    transport.write(&packet)?;
    transport.flush()?;
    Ok(())
}

fn reader_loop(
    transport: SharedTransport,
    state: Arc<Mutex<Tr60State>>,
    shutdown: Arc<AtomicBool>,
    left_tx: Sender<PulseEvent>,
    right_tx: Sender<PulseEvent>,
) {
    log::info!("TR60: Reader thread started (2ms loop)");

    let mut rx_buf: Vec<u8> = Vec::with_capacity(RX_BUFFER_CAP);
    let mut left = PulseForwarder::new(left_tx);
    let mut right = PulseForwarder::new(right_tx);
    let mut silent_cycles: u32 = 0;
    let mut cycle_count: u64 = 0;
    let mut battery_low_logged = false;

    loop {
        let cycle_start = Instant::now();

        if shutdown.load(Ordering::Relaxed) {
            log::info!("TR60: Reader thread shutting down");
            break;
        }

        // Drain the serial buffer, holding the lock only for the copy
        {
            let mut t = transport.lock();
            match t.available() {
                Ok(0) => {}
                Ok(available) => {
                    let mut chunk = vec![0u8; available.min(256)];
                    match t.read(&mut chunk) {
                        Ok(n) => rx_buf.extend_from_slice(&chunk[..n]),
                        Err(e) => log::error!("TR60: Read error: {}", e),
                    }
                }
                Err(e) => log::error!("TR60: available() error: {}", e),
            }
        }

        // Decode every complete frame in the buffer
        let mut got_frame = false;
        while let Ok((consumed, report)) = Tr60Report::decode_with_sync(&rx_buf) {
            rx_buf.drain(..consumed);
            got_frame = true;
            match report {
                Tr60Report::Status(frame) => {
                    let mut state = state.lock();
                    state.status = Some((frame, Instant::now()));
                    state.total_rx_frames += 1;
                }
                Tr60Report::Pulse { side, ticks } => {
                    log::trace!("TR60: pulse {} x{}", side.name(), ticks);
                    match side {
                        TrackSide::Left => left.push(ticks),
                        TrackSide::Right => right.push(ticks),
                    }
                }
            }
        }

        // A desynced stream with no recoverable frame must not grow forever
        if rx_buf.len() > RX_BUFFER_CAP {
            let drop_to = rx_buf.len() - 64;
            log::warn!("TR60: RX buffer desynced, dropping {} bytes", drop_to);
            rx_buf.drain(..drop_to);
        }

        left.flush();
        right.flush();

        if got_frame {
            if silent_cycles >= SILENT_WARN_CYCLES {
                log::info!(
                    "TR60: Link recovered after {}ms of silence",
                    silent_cycles * 2
                );
            }
            silent_cycles = 0;
        } else {
            silent_cycles += 1;
            if silent_cycles % SILENT_WARN_CYCLES == 0 {
                log::warn!(
                    "TR60: No frames from bridge for {}ms",
                    silent_cycles * 2
                );
            }
        }

        cycle_count += 1;
        if cycle_count % BATTERY_LOG_CYCLES == 0 {
            let snapshot = state.lock().status;
            if let Some((frame, _)) = snapshot {
                log::info!("TR60: Battery {:.2}V", frame.battery_mv as f32 / 1000.0);
                if frame.battery_mv < BATTERY_LOW_MV {
                    if !battery_low_logged {
                        log::warn!("TR60: Battery low ({}mV)", frame.battery_mv);
                        battery_low_logged = true;
                    }
                } else {
                    battery_low_logged = false;
                }
            }
        }

        let elapsed = cycle_start.elapsed();
        if elapsed < RECEIVE_INTERVAL {
            thread::sleep(RECEIVE_INTERVAL - elapsed);
        } else if elapsed.as_millis() > 3 {
            log::warn!("TR60: Read cycle overrun: {:?} (target: 2ms)", elapsed);
        }
    }

    log::info!("TR60: Reader thread stopped");
}

/// Drive stage handle: every call is one command frame on the wire.
struct Tr60Drive {
    transport: SharedTransport,
}

impl DriveControl for Tr60Drive {
    fn set_track(&mut self, side: TrackSide, drive: TrackDrive) -> Result<()> {
        send(&self.transport, Tr60Command::SetTrack { side, drive })
    }

    fn set_speed_counts(&mut self, left: u8, right: u8) -> Result<()> {
        send(&self.transport, Tr60Command::SetSpeedCounts { left, right })
    }

    fn set_drive_power(&mut self, on: bool) -> Result<()> {
        send(&self.transport, Tr60Command::DrivePower(on))
    }

    fn set_pulse_sense(&mut self, on: bool) -> Result<()> {
        send(&self.transport, Tr60Command::PulseSense(on))
    }
}

/// Sensor handle: reads come from the cached STATUS snapshot, only the
/// ultrasonic trigger touches the wire.
struct Tr60Sensors {
    transport: SharedTransport,
    state: Arc<Mutex<Tr60State>>,
    /// When the last ultrasonic trigger was sent; frames cached before this
    /// instant cannot complete the measurement
    us_triggered_at: Option<Instant>,
}

impl Tr60Sensors {
    fn latest(&self) -> Result<(StatusFrame, Instant)> {
        match self.state.lock().status {
            None => Err(Error::NotInitialized),
            Some((frame, at)) => {
                if at.elapsed() > STATUS_STALE_AFTER {
                    Err(Error::Timeout)
                } else {
                    Ok((frame, at))
                }
            }
        }
    }
}

impl AnalogSensors for Tr60Sensors {
    fn read_infrared(&mut self) -> Result<u16> {
        Ok(self.latest()?.0.infrared)
    }

    fn trigger_ultrasonic(&mut self) -> Result<()> {
        send(&self.transport, Tr60Command::UltrasonicTrigger)?;
        self.us_triggered_at = Some(Instant::now());
        Ok(())
    }

    fn poll_ultrasonic(&mut self) -> Result<Option<u16>> {
        let triggered_at = match self.us_triggered_at {
            Some(at) => at,
            None => return Ok(None),
        };
        let (frame, received_at) = self.latest()?;
        if received_at > triggered_at && frame.us_ready {
            Ok(Some(frame.us_mm))
        } else {
            Ok(None)
        }
    }

    fn read_gyro(&mut self) -> Result<i32> {
        Ok(self.latest()?.0.gyro as i32)
    }

    fn read_light(&mut self) -> Result<u16> {
        Ok(self.latest()?.0.light)
    }

    fn read_tilt(&mut self) -> Result<bool> {
        Ok(self.latest()?.0.tilt)
    }
}

/// Head and arm servo handle.
struct Tr60Head {
    transport: SharedTransport,
}

impl HeadServo for Tr60Head {
    fn set_angle(&mut self, degrees: i8) -> Result<()> {
        if !(-90..=90).contains(&degrees) {
            return Err(Error::InvalidParameter(format!(
                "head angle {} out of range",
                degrees
            )));
        }
        send(&self.transport, Tr60Command::HeadAngle(degrees))
    }

    fn park_arms(&mut self) -> Result<()> {
        send(&self.transport, Tr60Command::ParkArms)
    }
}

#[cfg(test)]
mod tests {
    use super::protocol::{encode_pulse, encode_status, CommandId, SYNC1, SYNC2};
    use super::*;
    use crate::transport::MockTransport;

    fn status() -> StatusFrame {
        StatusFrame {
            infrared: 150,
            light: 400,
            gyro: -3,
            tilt: false,
            us_ready: false,
            us_mm: 0,
            battery_mv: 7800,
        }
    }

    #[test]
    fn test_bridge_startup_and_sensor_reads() {
        let mock = MockTransport::new();
        mock.inject(&encode_status(&status()));
        let handles = with_transport(mock.clone()).unwrap();

        let mut sensors = handles.sensors;
        assert_eq!(sensors.read_infrared().unwrap(), 150);
        assert_eq!(sensors.read_light().unwrap(), 400);
        assert_eq!(sensors.read_gyro().unwrap(), -3);
        assert!(!sensors.read_tilt().unwrap());

        // Safe-state commands went out during startup
        let written = mock.written();
        assert!(written.len() >= 4);
        assert_eq!(written[0], SYNC1);
        assert_eq!(written[1], SYNC2);
        assert_eq!(written[3], CommandId::DrivePower as u8);
    }

    #[test]
    fn test_pulse_frames_reach_the_mailboxes() {
        let mock = MockTransport::new();
        mock.inject(&encode_status(&status()));
        mock.inject(&encode_pulse(TrackSide::Left, 1));
        mock.inject(&encode_pulse(TrackSide::Right, 2));
        let handles = with_transport(mock.clone()).unwrap();

        let left = handles
            .pulses
            .left
            .recv_timeout(Duration::from_millis(200))
            .unwrap();
        assert_eq!(left.ticks, 1);
        assert!(left.timestamp.elapsed() < Duration::from_secs(1));
        let right = handles
            .pulses
            .right
            .recv_timeout(Duration::from_millis(200))
            .unwrap();
        assert_eq!(right.ticks, 2);
    }

    #[test]
    fn test_full_mailbox_folds_ticks() {
        let mock = MockTransport::new();
        mock.inject(&encode_status(&status()));
        let handles = with_transport(mock.clone()).unwrap();

        // Three pulse frames land while nobody drains the mailbox; the
        // first fills it and the rest fold
        mock.inject(&encode_pulse(TrackSide::Left, 1));
        thread::sleep(Duration::from_millis(50));
        mock.inject(&encode_pulse(TrackSide::Left, 1));
        mock.inject(&encode_pulse(TrackSide::Left, 1));
        thread::sleep(Duration::from_millis(50));

        let first = handles.pulses.left.try_recv().unwrap();
        thread::sleep(Duration::from_millis(50));
        let second = handles.pulses.left.try_recv().unwrap();
        assert_eq!(first.ticks + second.ticks, 3);
    }

    #[test]
    fn test_ultrasonic_needs_fresh_ready_frame() {
        let mock = MockTransport::new();
        // Pre-trigger frame already claims a completed echo
        let mut pre = status();
        pre.us_ready = true;
        pre.us_mm = 999;
        mock.inject(&encode_status(&pre));
        let handles = with_transport(mock.clone()).unwrap();
        let mut sensors = handles.sensors;

        // Never triggered: no reading regardless of the cached flag
        assert_eq!(sensors.poll_ultrasonic().unwrap(), None);

        sensors.trigger_ultrasonic().unwrap();
        // The stale pre-trigger frame must not satisfy the poll
        assert_eq!(sensors.poll_ultrasonic().unwrap(), None);

        let mut done = status();
        done.us_ready = true;
        done.us_mm = 245;
        mock.inject(&encode_status(&done));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(sensors.poll_ultrasonic().unwrap(), Some(245));
    }

    #[test]
    fn test_startup_fails_on_silent_bridge() {
        let mock = MockTransport::new();
        let result = with_transport(mock);
        assert!(matches!(result, Err(Error::InitializationFailed(_))));
    }
}
