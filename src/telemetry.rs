use dsp::{level, Gamma};
use serde::Serialize;

/// The telemetry buffer stores the latest measurement as produced.
///
/// # Note
/// Values are converted to reporting units only when telemetry is requested.
#[derive(Clone, Default)]
pub struct TelemetryBuffer {
    /// The latest finished measurement.
    pub latest: Gamma,
    /// Frequency lock correction in Hz.
    pub correction: f32,
    /// Samples or measurements were lost.
    pub missing_samples: bool,
}

/// Telemetry for reporting.
#[derive(Serialize)]
pub struct Telemetry {
    /// Reference and sample levels in dBFS.
    pub levels: [f32; 2],

    /// Reference, sample and delta frequencies in Hz.
    pub frequencies: [f32; 3],

    /// Reference and delta phases in degrees.
    pub phases: [f32; 2],

    /// Side channel phase in degrees.
    pub side_phase: Option<f32>,

    /// Frequency lock correction in Hz.
    pub correction: f32,

    pub missing_samples: bool,
}

impl TelemetryBuffer {
    /// Convert the telemetry buffer to finalized telemetry for reporting.
    pub fn finalize(self) -> Telemetry {
        let g = &self.latest;
        Telemetry {
            levels: g.amplitudes.map(level),
            frequencies: [
                g.reference_frequency,
                g.sample_frequency,
                g.delta_frequency,
            ],
            phases: [g.reference_phase * 180., g.delta_phase * 180.],
            side_phase: g.side_phase.map(|p| p * 180.),
            correction: self.correction,
            missing_samples: self.missing_samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize() {
        let buffer = TelemetryBuffer {
            latest: Gamma {
                reference_phase: 0.5,
                delta_phase: -0.25,
                delta_frequency: 1.5,
                amplitudes: [0.1, 1.],
                ..Default::default()
            },
            correction: -2.,
            missing_samples: true,
        };
        let t = buffer.finalize();
        assert!((t.levels[0] + 20.).abs() < 1e-4);
        assert!(t.levels[1].abs() < 1e-4);
        assert_eq!(t.phases, [90., -45.]);

        let mut buf = [0u8; 256];
        let len = serde_json_core::to_slice(&t, &mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(json.contains("\"side_phase\":null"));
        assert!(json.contains("\"missing_samples\":true"));
    }
}
