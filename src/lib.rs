//! Driver for UHF RFID readers speaking the Nation serial protocol.
//!
//! A [`Reader`] owns one transport and exposes synchronous configure, query
//! and write commands plus a continuous inventory stream that runs on a
//! background thread. Commands issued while streaming are answered through
//! the stream worker, so STOP and friends work mid-inventory.
//!
//! # Features
//!
//! - `uart-esp32` - UART transport for ESP32 using esp-idf-svc
//! - `serial` - Serial port transport for desktop using serialport crate
//! - `serde` - Serialize/Deserialize for configuration and report types
//!
//! # Example
//!
//! ```ignore
//! use nation_rfid::{EpcWriteRequest, Reader};
//! use std::time::Duration;
//!
//! let mut reader = Reader::open("/dev/ttyUSB0", 115200)?;
//! reader.set_antenna_power(1, 30, Some(false))?;
//!
//! reader.start_inventory(
//!     &[1],
//!     |tag| println!("{} on antenna {}", tag.epc, tag.antenna),
//!     |reason| println!("inventory ended: {}", reason),
//! )?;
//! std::thread::sleep(Duration::from_secs(2));
//! reader.stop_inventory()?;
//!
//! let request = EpcWriteRequest::automatic("ABCD1111", false)?;
//! let report = reader.write_epc_verified(&request, Duration::from_secs(1))?;
//! println!("verified: {:?}", report.verified);
//! ```

mod config;
mod error;
mod frame;
mod inventory;
mod link;
mod protocol;
mod reader;
mod transport;
mod types;
mod write;

#[cfg(feature = "uart-esp32")]
mod uart;

#[cfg(feature = "serial")]
mod serial;

#[cfg(test)]
mod mock;

// Re-exports
pub use config::ReaderConfig;
pub use error::{FrameError, Result, RfidError};
pub use frame::{Frame, build_frame, crc16, extract_frames, extract_frames_with_limit, parse_frame};
pub use link::{Link, LinkState, StreamHandle};
pub use protocol::{FrameKind, Mid, StatusTable, classify, describe};
pub use reader::Reader;
pub use transport::RfidTransport;
pub use types::{
    AntennaMask, AntennaPowerMap, BasebandProfile, BuzzerMode, EndReason, InventoryEvent,
    ReaderInfo, ReaderProfile, RfBand, TagFilter, TagReport, WorkingFrequency, build_antenna_mask,
};
pub use write::{
    EpcWriteRequest, WriteReport, WriteResult, calculate_start_word, parse_write_response,
    validate_epc_hex,
};

#[cfg(feature = "uart-esp32")]
pub use uart::UartTransport;

#[cfg(feature = "serial")]
pub use serial::SerialTransport;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockHandle, MockTransport, fast_config, read_end, response, tag_frame};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// Reader that acknowledges every command with status 0.
    fn acking_reader() -> (Reader<MockTransport>, MockHandle) {
        let (transport, handle) = MockTransport::with_responder(|frame| {
            if frame.mid == Mid::STOP {
                vec![response(Mid::STOP, &[0x00]), read_end(1)]
            } else {
                vec![response(frame.mid, &[0x00])]
            }
        });
        (Reader::with_config(transport, fast_config()).unwrap(), handle)
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !done() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    // ===================
    // Session
    // ===================

    #[test]
    fn test_with_config_validates() {
        let (transport, _handle) = MockTransport::new();
        let config = ReaderConfig {
            stop_attempts: 0,
            ..ReaderConfig::default()
        };
        assert!(Reader::with_config(transport, config).is_err());
    }

    #[test]
    fn test_connect_flushes_and_stops() {
        let (mut reader, handle) = acking_reader();
        reader.connect().unwrap();
        assert_eq!(handle.flushes(), 1);
        assert_eq!(handle.count(Mid::STOP), 1);
        assert_eq!(reader.link_state(), LinkState::Idle);
    }

    #[test]
    fn test_rs485_address_applied() {
        let (transport, handle) = MockTransport::with_responder(|frame| {
            let reply = Frame::new(frame.mid, vec![0x00]).with_address(frame.address);
            vec![reply.encode().unwrap()]
        });
        let config = ReaderConfig {
            rs485_address: Some(0x07),
            ..fast_config()
        };
        let mut reader = Reader::with_config(transport, config).unwrap();
        reader.stop_inventory().unwrap();

        let sent = handle.written();
        assert!(sent[0].rs485());
        assert_eq!(sent[0].address, Some(0x07));
    }

    #[test]
    fn test_error_notification_maps_generic_reason() {
        let (transport, _handle) =
            MockTransport::with_responder(|_| vec![response(Mid::ERROR_NOTIFICATION, &[0x04])]);
        let mut reader = Reader::with_config(transport, fast_config()).unwrap();

        match reader.query_info() {
            Err(RfidError::DeviceRejected { command, code, reason }) => {
                assert_eq!(command, Mid::QUERY_INFO);
                assert_eq!(code, 0x04);
                assert_eq!(reason, "busy");
            }
            other => panic!("expected DeviceRejected, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_silent_reader_times_out() {
        let (transport, _handle) = MockTransport::new();
        let mut reader = Reader::with_config(transport, fast_config()).unwrap();
        let err = reader.query_rf_band().unwrap_err();
        assert!(matches!(err, RfidError::Timeout { command: Mid::QUERY_RF_BAND, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_query_info() {
        let mut info = vec![0x00, 0x04];
        info.extend_from_slice(b"SN01");
        info.extend_from_slice(&3600u32.to_be_bytes());
        info.extend_from_slice(&[0x00, 0x03]);
        info.extend_from_slice(b"BB1");
        info.extend_from_slice(&[0x01, 0x04, 1, 2, 3, 4]);
        let (transport, _handle) = MockTransport::with_responder(move |frame| {
            vec![response(frame.mid, &info)]
        });
        let mut reader = Reader::with_config(transport, fast_config()).unwrap();

        let info = reader.query_info().unwrap();
        assert_eq!(info.serial_number, "SN01");
        assert_eq!(info.power_on_secs, 3600);
        assert_eq!(info.baseband_compile_time, "BB1");
        assert_eq!(info.app_version.as_deref(), Some("V1.2.3.4"));
    }

    // ===================
    // Configuration
    // ===================

    #[test]
    fn test_baseband_configure_then_query() {
        let stored = Arc::new(Mutex::new([0u8; 4]));
        let device = Arc::clone(&stored);
        let (transport, _handle) = MockTransport::with_responder(move |frame| {
            if frame.mid == Mid::CONFIGURE_BASEBAND {
                let p = &frame.payload;
                *device.lock() = [p[1], p[3], p[5], p[7]];
                vec![response(frame.mid, &[0x00])]
            } else {
                vec![response(frame.mid, &device.lock()[..])]
            }
        });
        let mut reader = Reader::with_config(transport, fast_config()).unwrap();

        for profile in [
            BasebandProfile {
                speed: 0,
                q_value: 4,
                session: 0,
                inventory_flag: 1,
            },
            BasebandProfile {
                speed: 255,
                q_value: 4,
                session: 1,
                inventory_flag: 2,
            },
        ] {
            reader.configure_baseband(&profile).unwrap();
            assert_eq!(reader.query_baseband().unwrap(), profile);
        }
    }

    #[test]
    fn test_baseband_validation_sends_nothing() {
        let (mut reader, handle) = acking_reader();
        let profile = BasebandProfile {
            speed: 5,
            q_value: 4,
            session: 1,
            inventory_flag: 0,
        };
        assert!(matches!(
            reader.configure_baseband(&profile),
            Err(RfidError::InvalidParameter(_))
        ));
        assert!(handle.written().is_empty());
    }

    #[test]
    fn test_baseband_rejection_reason() {
        let (transport, _handle) = MockTransport::with_responder(|frame| vec![response(frame.mid, &[0x02])]);
        let mut reader = Reader::with_config(transport, fast_config()).unwrap();
        let profile = BasebandProfile {
            speed: 1,
            q_value: 4,
            session: 0,
            inventory_flag: 0,
        };
        match reader.configure_baseband(&profile) {
            Err(RfidError::DeviceRejected { reason, .. }) => assert_eq!(reason, "Q parameter error"),
            other => panic!("expected DeviceRejected, got {:?}", other),
        }
    }

    #[test]
    fn test_configure_power_payload_and_query() {
        let (transport, handle) = MockTransport::with_responder(|frame| {
            if frame.mid == Mid::QUERY_POWER {
                vec![response(frame.mid, &[1, 20, 2, 0])]
            } else {
                vec![response(frame.mid, &[0x00])]
            }
        });
        let mut reader = Reader::with_config(transport, fast_config()).unwrap();

        reader
            .configure_power(&AntennaPowerMap::new([(1, 20), (2, 0)], Some(true)))
            .unwrap();
        assert_eq!(handle.written()[0].payload, vec![1, 20, 2, 0, 0xFF, 0x01]);

        let levels = reader.query_power().unwrap();
        assert_eq!(levels.get(&1), Some(&20));
        assert_eq!(levels.get(&2), Some(&0));
    }

    #[test]
    fn test_power_out_of_range_sends_nothing() {
        let (mut reader, handle) = acking_reader();
        assert!(matches!(
            reader.set_antenna_power(1, 40, None),
            Err(RfidError::InvalidParameter(_))
        ));
        assert!(matches!(
            reader.set_antenna_power(65, 10, None),
            Err(RfidError::InvalidParameter(_))
        ));
        assert!(handle.written().is_empty());
    }

    #[test]
    fn test_power_rejection_reason() {
        let (transport, _handle) = MockTransport::with_responder(|frame| vec![response(frame.mid, &[0x02])]);
        let mut reader = Reader::with_config(transport, fast_config()).unwrap();
        match reader.set_antenna_power(1, 30, Some(false)) {
            Err(RfidError::DeviceRejected { command, code, reason }) => {
                assert_eq!(command, Mid::CONFIGURE_POWER);
                assert_eq!(code, 0x02);
                assert_eq!(reason, "reader does not support the power level");
            }
            other => panic!("expected DeviceRejected, got {:?}", other),
        }
    }

    #[test]
    fn test_antenna_enable_disable() {
        let (mut reader, handle) = acking_reader();
        assert_eq!(reader.enabled_antennas().ids(), vec![1]);

        reader.enable_antenna(3, false).unwrap();
        assert_eq!(reader.enabled_antennas().ids(), vec![1, 3]);
        assert_eq!(handle.written()[0].payload, vec![0x00, 0x00, 0x00, 0x05, 0xFF, 0x00]);

        reader.disable_antenna(1, true).unwrap();
        assert_eq!(reader.enabled_antennas().ids(), vec![3]);
        assert_eq!(handle.written()[1].payload, vec![0x00, 0x00, 0x00, 0x04, 0xFF, 0x01]);
    }

    #[test]
    fn test_antenna_mask_unchanged_on_rejection() {
        let (transport, _handle) = MockTransport::with_responder(|frame| vec![response(frame.mid, &[0x01])]);
        let mut reader = Reader::with_config(transport, fast_config()).unwrap();
        assert!(reader.enable_antenna(2, false).is_err());
        assert_eq!(reader.enabled_antennas().ids(), vec![1]);
        assert!(reader.enable_antenna(0, false).is_err());
    }

    #[test]
    fn test_buzzer_modes() {
        let (mut reader, handle) = acking_reader();
        assert_eq!(reader.buzzer(), BuzzerMode::Quiet);

        reader.set_buzzer(BuzzerMode::Continuous).unwrap();
        assert_eq!(handle.count(Mid::BUZZER_CONTROL), 1);
        assert_eq!(handle.written()[0].payload, vec![1, 1]);

        // Application-driven mode needs no frame
        reader.set_buzzer(BuzzerMode::OnNewTag).unwrap();
        assert_eq!(handle.count(Mid::BUZZER_CONTROL), 1);
        assert_eq!(reader.buzzer(), BuzzerMode::OnNewTag);
    }

    #[test]
    fn test_tag_filter_round_trip() {
        let (transport, handle) = MockTransport::with_responder(|frame| {
            if frame.mid == Mid::QUERY_TAG_FILTER {
                vec![response(frame.mid, &[0x00, 0x32, 0x40])]
            } else {
                vec![response(frame.mid, &[0x00])]
            }
        });
        let mut reader = Reader::with_config(transport, fast_config()).unwrap();
        let filter = TagFilter {
            repeat_time_ms: 500,
            rssi_threshold: Some(0x40),
        };
        reader.configure_tag_filter(&filter).unwrap();
        assert_eq!(handle.written()[0].payload, vec![0x01, 0x00, 0x32, 0x02, 0x40]);
        assert_eq!(reader.query_tag_filter().unwrap(), filter);
    }

    #[test]
    fn test_rf_band_and_frequency_queries() {
        let (transport, _handle) = MockTransport::with_responder(|frame| {
            if frame.mid == Mid::QUERY_RF_BAND {
                vec![response(frame.mid, &[0x03])]
            } else {
                vec![response(frame.mid, &[0x01, 4, 5, 6])]
            }
        });
        let mut reader = Reader::with_config(transport, fast_config()).unwrap();
        assert_eq!(reader.query_rf_band().unwrap(), RfBand::Fcc);
        assert_eq!(
            reader.query_working_frequency().unwrap(),
            WorkingFrequency::Manual(vec![4, 5, 6])
        );
    }

    #[test]
    fn test_profile_collects_every_query() {
        let mut info = vec![0x00, 0x04];
        info.extend_from_slice(b"SN02");
        info.extend_from_slice(&60u32.to_be_bytes());
        info.extend_from_slice(&[0x00, 0x03]);
        info.extend_from_slice(b"BB2");
        let (transport, handle) = MockTransport::with_responder(move |frame| {
            let data: Vec<u8> = match frame.mid {
                Mid::QUERY_INFO => info.clone(),
                Mid::QUERY_BASEBAND => vec![0, 4, 0, 1],
                Mid::QUERY_POWER => vec![1, 30, 2, 25],
                Mid::QUERY_RF_BAND => vec![0x03],
                Mid::QUERY_WORKING_FREQUENCY => vec![0x00],
                Mid::QUERY_TAG_FILTER => vec![0x00, 0x0A, 0x40],
                _ => vec![0x00],
            };
            vec![response(frame.mid, &data)]
        });
        let mut reader = Reader::with_config(transport, fast_config()).unwrap();
        reader.enable_antenna(2, false).unwrap();

        let profile = reader.profile().unwrap();
        assert_eq!(profile.info.serial_number, "SN02");
        assert_eq!(profile.baseband.speed, 0);
        assert_eq!(profile.baseband.inventory_flag, 1);
        assert_eq!(profile.power.get(&2), Some(&25));
        assert_eq!(profile.rf_band, RfBand::Fcc);
        assert_eq!(profile.working_frequency, WorkingFrequency::Auto);
        assert_eq!(profile.tag_filter.repeat_time_ms, 100);
        assert_eq!(profile.tag_filter.rssi_threshold, Some(0x40));
        assert_eq!(profile.enabled_antennas.ids(), vec![1, 2]);
        assert_eq!(profile.buzzer, BuzzerMode::Quiet);
        assert_eq!(handle.count(Mid::QUERY_TAG_FILTER), 1);
    }

    // ===================
    // Inventory
    // ===================

    #[test]
    fn test_stream_reports_tags_then_single_end() {
        let (transport, _handle) = MockTransport::with_responder(|frame| {
            if frame.mid == Mid::READ_EPC {
                vec![
                    response(Mid::READ_EPC, &[0x00]),
                    tag_frame(&[0xE2, 0x00, 0x00, 0x01], 1, Some(0x90)),
                    tag_frame(&[0xE2, 0x00, 0x00, 0x02], 2, None),
                    read_end(1),
                ]
            } else {
                vec![response(frame.mid, &[0x00])]
            }
        });
        let mut reader = Reader::with_config(transport, fast_config()).unwrap();
        let tags = Arc::new(Mutex::new(Vec::new()));
        let ends = Arc::new(Mutex::new(Vec::new()));
        let (tag_sink, end_sink) = (Arc::clone(&tags), Arc::clone(&ends));

        reader
            .start_inventory(
                &[1, 2],
                move |tag| tag_sink.lock().push(tag),
                move |reason| end_sink.lock().push(reason),
            )
            .unwrap();
        wait_until(|| !reader.is_inventory_running());
        reader.stop_inventory().unwrap();

        let tags = tags.lock();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].epc, "E2000001");
        assert_eq!(tags[0].rssi, Some(0x90));
        assert_eq!(tags[1].antenna, 2);
        assert_eq!(*ends.lock(), vec![EndReason::StoppedByCommand]);
        assert_eq!(reader.link_state(), LinkState::Idle);
    }

    #[test]
    fn test_stop_while_streaming() {
        let (mut reader, handle) = acking_reader();
        let events = reader.start_inventory_channel(&[1]).unwrap();
        assert!(reader.is_inventory_running());
        assert_eq!(reader.link_state(), LinkState::InventoryStreaming);

        handle.inject(&tag_frame(&[0x30, 0x08], 1, None));
        assert!(matches!(
            events.recv_timeout(Duration::from_secs(1)).unwrap(),
            InventoryEvent::Tag(_)
        ));

        reader.stop_inventory().unwrap();
        assert_eq!(handle.count(Mid::STOP), 1);
        assert!(!reader.is_inventory_running());
        assert_eq!(reader.link_state(), LinkState::Idle);
        assert_eq!(
            events.recv_timeout(Duration::from_secs(1)).unwrap(),
            InventoryEvent::Ended(EndReason::StoppedByCommand)
        );
    }

    #[test]
    fn test_connect_then_start_reports_first_tag() {
        let (mut reader, handle) = acking_reader();
        reader.connect().unwrap();
        let events = reader.start_inventory_channel(&[1]).unwrap();

        handle.inject(&tag_frame(&[0xE2, 0x80], 1, None));
        match events.recv_timeout(Duration::from_secs(1)).unwrap() {
            InventoryEvent::Tag(tag) => assert_eq!(tag.epc, "E280"),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(reader.is_inventory_running());
        reader.stop_inventory().unwrap();
    }

    #[test]
    fn test_command_during_stream_stops_it_first() {
        let (mut reader, handle) = acking_reader();
        let _events = reader.start_inventory_channel(&[1]).unwrap();

        reader.set_buzzer(BuzzerMode::Quiet).unwrap();
        assert!(!reader.is_inventory_running());
        let mids: Vec<Mid> = handle.written().iter().map(|frame| frame.mid).collect();
        assert_eq!(mids, vec![Mid::READ_EPC, Mid::STOP, Mid::BUZZER_CONTROL]);
    }

    #[test]
    fn test_start_twice_restarts_stream() {
        let (mut reader, handle) = acking_reader();
        let first = reader.start_inventory_channel(&[1]).unwrap();
        let _second = reader.start_inventory_channel(&[2]).unwrap();

        assert_eq!(handle.count(Mid::READ_EPC), 2);
        assert_eq!(handle.count(Mid::STOP), 1);
        assert_eq!(
            first.recv_timeout(Duration::from_secs(1)).unwrap(),
            InventoryEvent::Ended(EndReason::StoppedByCommand)
        );
        reader.stop_inventory().unwrap();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (mut reader, handle) = acking_reader();
        reader.stop_inventory().unwrap();
        reader.stop_inventory().unwrap();
        assert_eq!(handle.count(Mid::STOP), 2);
    }

    #[test]
    fn test_stop_retries_then_times_out() {
        let (transport, handle) = MockTransport::new();
        let mut reader = Reader::with_config(transport, fast_config()).unwrap();
        let err = reader.stop_inventory().unwrap_err();
        assert!(matches!(err, RfidError::Timeout { command: Mid::STOP, .. }));
        assert_eq!(handle.count(Mid::STOP), 3);
    }

    #[test]
    fn test_stop_accepts_read_end_notification() {
        let (transport, _handle) = MockTransport::with_responder(|_| vec![read_end(1)]);
        let mut reader = Reader::with_config(transport, fast_config()).unwrap();
        reader.stop_inventory().unwrap();
    }

    #[test]
    fn test_stop_rejected() {
        let (transport, _handle) = MockTransport::with_responder(|frame| vec![response(frame.mid, &[0x01])]);
        let mut reader = Reader::with_config(transport, fast_config()).unwrap();
        assert!(matches!(
            reader.stop_inventory(),
            Err(RfidError::DeviceRejected { command: Mid::STOP, code: 0x01, .. })
        ));
    }

    #[test]
    fn test_close_stops_stream() {
        let (mut reader, handle) = acking_reader();
        let events = reader.start_inventory_channel(&[1]).unwrap();
        reader.close().unwrap();
        assert_eq!(handle.count(Mid::STOP), 1);
        assert_eq!(
            events.recv_timeout(Duration::from_secs(1)).unwrap(),
            InventoryEvent::Ended(EndReason::StoppedByCommand)
        );
    }

    // ===================
    // Tag writes
    // ===================

    #[test]
    fn test_write_epc_automatic() {
        let (mut reader, handle) = acking_reader();
        let request = EpcWriteRequest::automatic("ABCD1111", false).unwrap();
        let report = reader.write_epc(&request).unwrap();

        assert_eq!(report.start_word, 2);
        assert_eq!(report.word_count, 2);
        assert_eq!(report.verified, None);
        assert!(handle.flushes() >= 1);
        let sent = &handle.written()[0];
        assert_eq!(sent.mid, Mid::WRITE_EPC);
        assert_eq!(
            sent.payload,
            vec![0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x02, 0x00, 0x04, 0xAB, 0xCD, 0x11, 0x11]
        );
    }

    #[test]
    fn test_write_failure_carries_failed_word() {
        let (transport, _handle) = MockTransport::with_responder(|frame| {
            vec![response(frame.mid, &[0x07, 0x01, 0x02, 0x00, 0x03])]
        });
        let mut reader = Reader::with_config(transport, fast_config()).unwrap();
        let request = EpcWriteRequest::explicit("ABCD", 2).unwrap();

        match reader.write_epc(&request) {
            Err(RfidError::WriteRejected { result, failed_word }) => {
                assert_eq!(result, WriteResult::Locked);
                assert_eq!(failed_word, Some(3));
            }
            other => panic!("expected WriteRejected, got {:?}", other),
        }
    }

    /// Reader whose field holds one tag; writes replace its EPC.
    fn tag_in_field(epc: &[u8]) -> (Reader<MockTransport>, MockHandle) {
        let field = Arc::new(Mutex::new(epc.to_vec()));
        let (transport, handle) = MockTransport::with_responder(move |frame| {
            if frame.mid == Mid::WRITE_EPC {
                let p = &frame.payload;
                let len = u16::from_be_bytes([p[7], p[8]]) as usize;
                *field.lock() = p[9..9 + len].to_vec();
                vec![response(frame.mid, &[0x00])]
            } else if frame.mid == Mid::READ_EPC {
                vec![response(frame.mid, &[0x00]), tag_frame(&field.lock(), 1, None)]
            } else {
                vec![response(frame.mid, &[0x00]), read_end(1)]
            }
        });
        (Reader::with_config(transport, fast_config()).unwrap(), handle)
    }

    #[test]
    fn test_write_epc_verified() {
        let (mut reader, _handle) = tag_in_field(&[0x11, 0x11]);
        let request = EpcWriteRequest::automatic("ABCD1111", false).unwrap();
        let report = reader
            .write_epc_verified(&request, Duration::from_millis(300))
            .unwrap();
        assert_eq!(report.verified, Some(true));
        assert_eq!(reader.link_state(), LinkState::Idle);
    }

    #[test]
    fn test_write_epc_to_target() {
        let (mut reader, handle) = tag_in_field(&[0x12, 0x34]);
        let request = EpcWriteRequest::automatic("BEEF", false).unwrap();
        let report = reader
            .write_epc_to_target("1234", request, Duration::from_millis(300))
            .unwrap();
        assert_eq!(report.verified, Some(true));

        let write = handle
            .written()
            .into_iter()
            .find(|frame| frame.mid == Mid::WRITE_EPC)
            .unwrap();
        // match TLV for 0x1234 at word 2
        assert_eq!(
            &write.payload[11..],
            &[0x01, 0x00, 0x06, 0x01, 0x00, 0x02, 0x10, 0x12, 0x34]
        );
    }

    #[test]
    fn test_write_to_missing_target() {
        let (mut reader, handle) = tag_in_field(&[0x12, 0x34]);
        let request = EpcWriteRequest::automatic("BEEF", false).unwrap();
        assert!(matches!(
            reader.write_epc_to_target("9999", request, Duration::from_millis(50)),
            Err(RfidError::TagNotFound(_))
        ));
        assert_eq!(handle.count(Mid::WRITE_EPC), 0);
    }
}
