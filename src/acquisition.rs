//! Reassembly of the Acquire channel into status events and whole spectra.
//!
//! The device splits a spectrum across many notifications, each prefixed with
//! the index of its first pixel. Between (and before) those fragments it may
//! send status messages behind the `0xFFFF` sentinel. BLE delivers
//! notifications in order per characteristic, so fragments must line up
//! exactly; a gap or overlap is a protocol violation that aborts the
//! acquisition rather than something to resequence.

use log::{debug, info, warn};

use crate::error::{ProtocolError, Result};
use crate::parse::{parse_acquire_notification, AcquireNotification};
use crate::types::{AcquisitionPhase, AcquisitionStatus, Spectrum, StatusCode, StatusSeverity};

/// Result of feeding one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Pixel data accepted; more fragments expected.
    Pending { pixels_read: usize },
    /// A non-fatal status message.
    Status(AcquisitionStatus),
    /// Every pixel has arrived.
    Complete(Spectrum),
}

/// Per-acquisition state: a preallocated buffer and a monotonic write index.
#[derive(Debug)]
pub struct AcquisitionReassembler {
    buffer: Vec<u16>,
    pixels_read: usize,
    phase: AcquisitionPhase,
    complete: bool,
}

impl AcquisitionReassembler {
    pub fn new(total_pixels: usize) -> Self {
        Self {
            buffer: vec![0; total_pixels],
            pixels_read: 0,
            phase: AcquisitionPhase::Idle,
            complete: false,
        }
    }

    pub fn total_pixels(&self) -> usize {
        self.buffer.len()
    }

    pub fn pixels_read(&self) -> usize {
        self.pixels_read
    }

    pub fn phase(&self) -> AcquisitionPhase {
        self.phase
    }

    /// Consume one Acquire notification.
    ///
    /// Errors abort the acquisition: the phase becomes
    /// [`AcquisitionPhase::Error`] and no spectrum will be produced.
    pub fn feed(&mut self, data: &[u8]) -> Result<Progress> {
        if self.complete {
            debug!("Acquire: notification after completion ignored ({} bytes)", data.len());
            return Ok(Progress::Pending {
                pixels_read: self.pixels_read,
            });
        }
        let outcome = match parse_acquire_notification(data) {
            Ok(AcquireNotification::Status(status)) => self.on_status(status),
            Ok(AcquireNotification::Pixels {
                first_pixel,
                intensities,
            }) => self.on_pixels(first_pixel as usize, &intensities),
            Err(e) => Err(e),
        };
        if outcome.is_err() {
            self.phase = AcquisitionPhase::Error;
        }
        outcome
    }

    fn on_status(&mut self, status: AcquisitionStatus) -> Result<Progress> {
        match status.code.severity() {
            StatusSeverity::Fatal => {
                warn!(
                    "Acquire: {} ({}) {:02x?}",
                    status.code.name(),
                    status.code.as_byte(),
                    status.payload
                );
                Err(ProtocolError::AcquisitionFailed {
                    code: status.code.as_byte(),
                    name: status.code.name(),
                    message: status.code.message(),
                })
            }
            StatusSeverity::Progress => {
                self.phase = match status.code {
                    StatusCode::AutoOptimizing => AcquisitionPhase::Optimizing,
                    StatusCode::TakingDark => AcquisitionPhase::Dark,
                    StatusCode::LaserWarmup => AcquisitionPhase::Warmup,
                    _ => AcquisitionPhase::Raman,
                };
                info!("Acquire: {}", status.describe());
                Ok(Progress::Status(status))
            }
            StatusSeverity::Diagnostic => {
                warn!("Acquire: {} – {}", status.code.name(), status.describe());
                Ok(Progress::Status(status))
            }
        }
    }

    fn on_pixels(&mut self, first_pixel: usize, intensities: &[u16]) -> Result<Progress> {
        if first_pixel != self.pixels_read {
            return Err(ProtocolError::OutOfOrderFragment {
                expected: self.pixels_read,
                got: first_pixel,
            });
        }
        let total = self.buffer.len();
        if self.pixels_read + intensities.len() > total {
            return Err(ProtocolError::OverlongFragment {
                pixels_read: self.pixels_read,
                count: intensities.len(),
                total,
            });
        }

        self.phase = AcquisitionPhase::Reading;
        let end = self.pixels_read + intensities.len();
        self.buffer[self.pixels_read..end].copy_from_slice(intensities);
        self.pixels_read = end;

        if self.pixels_read == total {
            self.phase = AcquisitionPhase::Done;
            self.complete = true;
            debug!("Acquire: spectrum complete ({total} px)");
            return Ok(Progress::Complete(Spectrum {
                pixels: std::mem::take(&mut self.buffer),
            }));
        }
        Ok(Progress::Pending {
            pixels_read: self.pixels_read,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(first_pixel: u16, values: impl IntoIterator<Item = u16>) -> Vec<u8> {
        let mut out = first_pixel.to_be_bytes().to_vec();
        for v in values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    #[test]
    fn fragments_complete_only_at_the_full_length() {
        let mut r = AcquisitionReassembler::new(1952);
        let bounds = [(0u16, 100u16), (100, 500), (500, 1000), (1000, 1952)];

        for (i, (start, end)) in bounds.iter().enumerate() {
            let progress = r.feed(&fragment(*start, *start..*end)).unwrap();
            if i + 1 < bounds.len() {
                assert_eq!(
                    progress,
                    Progress::Pending {
                        pixels_read: *end as usize
                    }
                );
            } else {
                match progress {
                    Progress::Complete(s) => {
                        assert_eq!(s.len(), 1952);
                        assert!(s.pixels.iter().enumerate().all(|(i, &v)| v as usize == i));
                    }
                    other => panic!("expected completion, got {other:?}"),
                }
            }
        }
        assert_eq!(r.phase(), AcquisitionPhase::Done);
    }

    #[test]
    fn gaps_and_overlaps_are_out_of_order() {
        let mut r = AcquisitionReassembler::new(1952);
        r.feed(&fragment(0, 0..100)).unwrap();
        assert!(matches!(
            r.feed(&fragment(50, 0..10)),
            Err(ProtocolError::OutOfOrderFragment {
                expected: 100,
                got: 50
            })
        ));
        assert_eq!(r.phase(), AcquisitionPhase::Error);

        let mut r = AcquisitionReassembler::new(10);
        assert!(matches!(
            r.feed(&fragment(4, 0..2)),
            Err(ProtocolError::OutOfOrderFragment { expected: 0, got: 4 })
        ));
    }

    #[test]
    fn overlong_fragments_are_rejected() {
        let mut r = AcquisitionReassembler::new(10);
        r.feed(&fragment(0, 0..8)).unwrap();
        assert!(matches!(
            r.feed(&fragment(8, 0..3)),
            Err(ProtocolError::OverlongFragment {
                pixels_read: 8,
                count: 3,
                total: 10
            })
        ));
    }

    #[test]
    fn battery_status_aborts_before_any_pixel_is_written() {
        let mut r = AcquisitionReassembler::new(16);
        match r.feed(&[0xff, 0xff, 1]) {
            Err(ProtocolError::AcquisitionFailed { code, name, .. }) => {
                assert_eq!(code, 1);
                assert_eq!(name, "ERR_BATT_SOC_INFO_NOT_RCVD");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(r.pixels_read(), 0);
        assert_eq!(r.phase(), AcquisitionPhase::Error);
    }

    #[test]
    fn auto_raman_phases_are_tracked() {
        let mut r = AcquisitionReassembler::new(4);
        let steps: [(u8, AcquisitionPhase); 4] = [
            (32, AcquisitionPhase::Optimizing),
            (33, AcquisitionPhase::Dark),
            (34, AcquisitionPhase::Warmup),
            (35, AcquisitionPhase::Raman),
        ];
        for (code, phase) in steps {
            assert!(matches!(r.feed(&[0xff, 0xff, code, 1, 3]), Ok(Progress::Status(_))));
            assert_eq!(r.phase(), phase);
        }
        assert!(matches!(
            r.feed(&fragment(0, [1, 2, 3, 4])),
            Ok(Progress::Complete(_))
        ));
        assert_eq!(r.phase(), AcquisitionPhase::Done);
    }

    #[test]
    fn diagnostic_codes_do_not_abort() {
        let mut r = AcquisitionReassembler::new(2);
        match r.feed(&[0xff, 0xff, 5]).unwrap() {
            Progress::Status(s) => assert_eq!(s.code, StatusCode::ImageSensorBadState),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(r.phase(), AcquisitionPhase::Idle);
        assert!(matches!(r.feed(&fragment(0, [7, 8])), Ok(Progress::Complete(_))));
    }

    #[test]
    fn unknown_status_codes_abort() {
        let mut r = AcquisitionReassembler::new(2);
        assert!(matches!(
            r.feed(&[0xff, 0xff, 0x77]),
            Err(ProtocolError::UnknownStatusCode { code: 0x77, .. })
        ));
        assert_eq!(r.phase(), AcquisitionPhase::Error);
    }
}
