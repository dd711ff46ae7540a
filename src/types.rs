use serde::Serialize;

/// A complete spectrum: one intensity per active horizontal pixel.
///
/// Only produced by [`crate::acquisition::AcquisitionReassembler`] once every
/// pixel index has been written exactly once, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Spectrum {
    pub pixels: Vec<u16>,
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Index and value of the brightest pixel.
    pub fn peak(&self) -> Option<(usize, u16)> {
        self.pixels
            .iter()
            .copied()
            .enumerate()
            .max_by_key(|&(_, v)| v)
    }
}

/// Argument byte written to the Acquire characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AcquisitionMode {
    /// Single read with the current settings.
    Plain,
    /// Device takes a dark, then the measurement, and returns the difference.
    AutoDark,
    /// Full auto-Raman: exposure optimisation, dark, laser warmup, Raman.
    AutoRaman,
}

impl AcquisitionMode {
    pub fn as_byte(self) -> u8 {
        match self {
            AcquisitionMode::Plain => 0,
            AcquisitionMode::AutoDark => 1,
            AcquisitionMode::AutoRaman => 2,
        }
    }
}

/// How the session reacts to an acquisition status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusSeverity {
    /// Reported as an event; the acquisition carries on.
    Diagnostic,
    /// Reported as an event and advances the acquisition phase.
    Progress,
    /// Aborts the in-flight acquisition.
    Fatal,
}

/// Status codes sent on the Acquire channel behind the `0xFFFF` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusCode {
    Nak,
    BatterySocInfoNotReceived,
    BatterySocTooLow,
    LaserDisableFailure,
    LaserEnableFailure,
    ImageSensorBadState,
    ImageSensorStateTransitionFailure,
    SpectrumSignalWaitTimeout,
    AutoOptimizing,
    TakingDark,
    LaserWarmup,
    TakingRaman,
}

struct StatusInfo {
    code: StatusCode,
    byte: u8,
    name: &'static str,
    message: &'static str,
    severity: StatusSeverity,
}

const STATUS_TABLE: [StatusInfo; 12] = [
    StatusInfo {
        code: StatusCode::Nak,
        byte: 0,
        name: "NAK",
        message: "acquire request not acknowledged",
        severity: StatusSeverity::Diagnostic,
    },
    StatusInfo {
        code: StatusCode::BatterySocInfoNotReceived,
        byte: 1,
        name: "ERR_BATT_SOC_INFO_NOT_RCVD",
        message: "battery state of charge unavailable",
        severity: StatusSeverity::Fatal,
    },
    StatusInfo {
        code: StatusCode::BatterySocTooLow,
        byte: 2,
        name: "ERR_BATT_SOC_TOO_LOW",
        message: "battery too low to fire the laser",
        severity: StatusSeverity::Fatal,
    },
    StatusInfo {
        code: StatusCode::LaserDisableFailure,
        byte: 3,
        name: "ERR_LASER_DIS_FLR",
        message: "failed to disable the laser",
        severity: StatusSeverity::Fatal,
    },
    StatusInfo {
        code: StatusCode::LaserEnableFailure,
        byte: 4,
        name: "ERR_LASER_ENA_FLR",
        message: "failed to enable the laser",
        severity: StatusSeverity::Fatal,
    },
    StatusInfo {
        code: StatusCode::ImageSensorBadState,
        byte: 5,
        name: "ERR_IMG_SNSR_IN_BAD_STATE",
        message: "image sensor in bad state",
        severity: StatusSeverity::Diagnostic,
    },
    StatusInfo {
        code: StatusCode::ImageSensorStateTransitionFailure,
        byte: 6,
        name: "ERR_IMG_SNSR_STATE_TRANS_FLR",
        message: "image sensor state transition failed",
        severity: StatusSeverity::Diagnostic,
    },
    StatusInfo {
        code: StatusCode::SpectrumSignalWaitTimeout,
        byte: 7,
        name: "ERR_SPEC_ACQ_SIG_WAIT_TMO",
        message: "timed out waiting for the spectrum ready signal",
        severity: StatusSeverity::Diagnostic,
    },
    StatusInfo {
        code: StatusCode::AutoOptimizing,
        byte: 32,
        name: "AUTO_OPT_TARGET_RATIO",
        message: "optimizing exposure",
        severity: StatusSeverity::Progress,
    },
    StatusInfo {
        code: StatusCode::TakingDark,
        byte: 33,
        name: "AUTO_TAKING_DARK",
        message: "taking dark",
        severity: StatusSeverity::Progress,
    },
    StatusInfo {
        code: StatusCode::LaserWarmup,
        byte: 34,
        name: "AUTO_LASER_WARMUP",
        message: "laser warming up",
        severity: StatusSeverity::Progress,
    },
    StatusInfo {
        code: StatusCode::TakingRaman,
        byte: 35,
        name: "AUTO_TAKING_RAMAN",
        message: "taking Raman",
        severity: StatusSeverity::Progress,
    },
];

impl StatusCode {
    pub fn from_byte(b: u8) -> Option<Self> {
        STATUS_TABLE.iter().find(|i| i.byte == b).map(|i| i.code)
    }

    /// Rows are in declaration order, so the discriminant is the index.
    fn info(self) -> &'static StatusInfo {
        &STATUS_TABLE[self as usize]
    }

    pub fn as_byte(self) -> u8 {
        self.info().byte
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn message(self) -> &'static str {
        self.info().message
    }

    pub fn severity(self) -> StatusSeverity {
        self.info().severity
    }
}

/// One decoded status notification from the Acquire channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcquisitionStatus {
    pub code: StatusCode,
    pub payload: Vec<u8>,
}

impl AcquisitionStatus {
    /// `(current_step, total_steps)` for the averaging phases, when present.
    pub fn progress(&self) -> Option<(u8, u8)> {
        match (self.code, self.payload.as_slice()) {
            (StatusCode::TakingDark | StatusCode::TakingRaman, [step, steps, ..]) => {
                Some((*step, *steps))
            }
            _ => None,
        }
    }

    /// Human-readable one-liner for logs and UIs.
    pub fn describe(&self) -> String {
        match self.progress() {
            Some((step, steps)) => format!("{} ({step}/{steps})", self.code.message()),
            None => self.code.message().to_owned(),
        }
    }
}

/// Where an acquisition currently is.
///
/// ```text
/// Idle ──► Optimizing ──► Dark ──► Warmup ──► Raman ──► Done
///   │                                                    ▲
///   └────────────── (plain / first pixel data) ──────────┘
///   any state ──► Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AcquisitionPhase {
    Idle,
    Optimizing,
    Dark,
    Warmup,
    Raman,
    Reading,
    Done,
    Error,
}

/// Laser flags pushed on the LASER_STATE characteristic.
///
/// Fields beyond the end of a truncated notification are reported as `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LaserState {
    pub mode: u8,
    pub laser_type: u8,
    pub enable: bool,
    pub watchdog_sec: u8,
    pub status_mask: u8,
}

impl LaserState {
    pub fn interlock_closed(&self) -> bool {
        self.status_mask & crate::protocol::LASER_INTERLOCK_CLOSED != 0
    }

    pub fn firing(&self) -> bool {
        self.status_mask & crate::protocol::LASER_FIRING != 0
    }
}

/// Battery charge pushed on the BATTERY_STATE characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatteryState {
    /// State of charge, 0–100.
    pub percentage: u8,
    pub charging: bool,
}

/// Unsolicited events produced by a [`crate::session::Session`].
///
/// Consumers receive these through the `mpsc::Receiver` returned by
/// [`crate::session::Session::start`]. Results of requests (attribute values,
/// spectra) are returned from the request futures instead.
#[derive(Debug, Clone)]
pub enum SpectrometerEvent {
    /// A non-fatal status or progress update for the running acquisition.
    AcquisitionStatus(AcquisitionStatus),
    /// The acquisition moved to a new phase.
    Phase(AcquisitionPhase),
    /// Latest laser flags.
    LaserState(LaserState),
    /// Latest battery state.
    Battery(BatteryState),
    /// A Generic response arrived with no waiting request.
    OrphanResponse { seq: u8 },
    /// The notification stream ended; no further events will arrive.
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_table_round_trips() {
        for b in 0..=255u8 {
            if let Some(code) = StatusCode::from_byte(b) {
                assert_eq!(code.as_byte(), b);
            }
        }
        assert_eq!(StatusCode::from_byte(8), None);
        assert_eq!(StatusCode::from_byte(36), None);
        assert_eq!(
            StatusCode::from_byte(1).unwrap().name(),
            "ERR_BATT_SOC_INFO_NOT_RCVD"
        );
    }

    #[test]
    fn exactly_four_codes_are_fatal() {
        let fatal: Vec<u8> = (0..=255u8)
            .filter_map(StatusCode::from_byte)
            .filter(|c| c.severity() == StatusSeverity::Fatal)
            .map(StatusCode::as_byte)
            .collect();
        assert_eq!(fatal, vec![1, 2, 3, 4]);
    }

    #[test]
    fn every_code_has_its_own_row() {
        for (i, row) in STATUS_TABLE.iter().enumerate() {
            assert_eq!(row.code as usize, i);
            assert_eq!(row.code.as_byte(), row.byte);
            assert_eq!(row.code.name(), row.name);
        }
        assert_eq!(StatusCode::TakingRaman.name(), "AUTO_TAKING_RAMAN");
        assert_eq!(StatusCode::Nak.severity(), StatusSeverity::Diagnostic);
    }

    #[test]
    fn averaging_phases_report_steps() {
        let s = AcquisitionStatus {
            code: StatusCode::TakingDark,
            payload: vec![2, 5],
        };
        assert_eq!(s.progress(), Some((2, 5)));
        assert_eq!(s.describe(), "taking dark (2/5)");

        let s = AcquisitionStatus {
            code: StatusCode::LaserWarmup,
            payload: vec![2, 5],
        };
        assert_eq!(s.progress(), None);
    }

    #[test]
    fn laser_status_bits() {
        let s = LaserState {
            status_mask: 0b11,
            ..Default::default()
        };
        assert!(s.interlock_closed());
        assert!(s.firing());
        assert!(!LaserState::default().interlock_closed());
    }

    #[test]
    fn spectrum_peak() {
        let s = Spectrum {
            pixels: vec![3, 9, 4],
        };
        assert_eq!(s.peak(), Some((1, 9)));
        assert_eq!(s.len(), 3);
    }
}
