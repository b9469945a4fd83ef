//! # Speech Preprocessing
//!
//! Light cleanup applied to a finished recording before it is encoded. Platform
//! microphones that already do noise suppression are left alone; raw device input
//! (or a scripted file) gets the same treatment in software.
//!
//! ## Processing Steps:
//! 1. **Remove DC offset**: centre the signal around zero
//! 2. **Normalize volume**: use most of the 16-bit range without clipping
//! 3. **Smooth**: a 3-point moving average takes the edge off hiss

/// Software cleanup for one captured utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechFilter {
    /// Apply the low-pass smoothing step
    pub noise_suppression: bool,
}

impl SpeechFilter {
    pub fn new(noise_suppression: bool) -> Self {
        Self { noise_suppression }
    }

    /// Process samples in place.
    pub fn apply(&self, samples: &mut [i16]) {
        if samples.is_empty() {
            return;
        }

        let dc_offset = dc_offset(samples);
        for sample in samples.iter_mut() {
            *sample = sample.saturating_sub(dc_offset);
        }

        normalize_volume(samples);

        if self.noise_suppression {
            smooth(samples);
        }
    }
}

/// Average value of the samples.
fn dc_offset(samples: &[i16]) -> i16 {
    if samples.is_empty() {
        return 0;
    }
    let sum: i64 = samples.iter().map(|&s| s as i64).sum();
    (sum / samples.len() as i64) as i16
}

/// Scale so the loudest sample sits just under full scale.
///
/// Near-silence is left alone so background noise isn't amplified into speech-sized
/// payloads, and already-loud input is left alone to avoid pumping.
fn normalize_volume(samples: &mut [i16]) {
    let max_abs = samples
        .iter()
        .map(|&s| s.unsigned_abs())
        .max()
        .unwrap_or(1);

    if !(100..=30000).contains(&max_abs) {
        return;
    }

    let target_max = 28000f32;
    let scale = target_max / max_abs as f32;
    for sample in samples.iter_mut() {
        let scaled = (*sample as f32 * scale) as i32;
        *sample = scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    }
}

fn smooth(samples: &mut [i16]) {
    if samples.len() < 3 {
        return;
    }
    let original = samples.to_vec();
    for i in 1..samples.len() - 1 {
        let avg = (original[i - 1] as i32 + original[i] as i32 + original[i + 1] as i32) / 3;
        samples[i] = avg as i16;
    }
}
