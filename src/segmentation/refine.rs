use super::types::Matte;

const THRESH_BG: f32 = 0.2;
const THRESH_FG: f32 = 0.8;

/// Weight of the current frame where it agrees with the previous one.
const CURRENT_WEIGHT: f32 = 0.3;
/// Scores further apart than this are treated as motion, not noise.
const AGREEMENT: f32 = 0.25;

/// Stretch scores so that below `THRESH_BG` is background and above
/// `THRESH_FG` is foreground, with a linear ramp in between.
pub fn threshold_mask(matte: &mut [f32]) {
    for value in matte.iter_mut() {
        *value = ((*value - THRESH_BG) / (THRESH_FG - THRESH_BG)).clamp(0.0, 1.0);
    }
}

/// Smooths scores across consecutive frames of one stream.
#[derive(Debug, Default)]
pub struct TemporalFusion {
    previous: Option<Matte>,
}

impl TemporalFusion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn fuse(&mut self, mut current: Matte) -> Matte {
        if let Some(previous) = self.previous.as_ref().filter(|p| p.len() == current.len()) {
            for (cur, prev) in current.iter_mut().zip(previous) {
                if (*cur - prev).abs() <= AGREEMENT {
                    *cur = CURRENT_WEIGHT * *cur + (1.0 - CURRENT_WEIGHT) * prev;
                }
            }
        }
        self.previous = Some(current.clone());
        current
    }
}
