/// Exponential smoothing of the distance estimate.
///
/// Formula: `previous = previous + reaction_factor * (measured - previous)`.
/// The first measurement is adopted unchanged. Only the previous value is
/// retained between steps.
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceSmoother {
    reaction_factor: f32,
    previous: Option<f32>,
}

impl DistanceSmoother {
    pub fn new(reaction_factor: f32) -> Self {
        Self {
            reaction_factor,
            previous: None,
        }
    }

    pub fn reaction_factor(&self) -> f32 {
        self.reaction_factor
    }

    /// Applies to the next `smooth` call; the previous value is kept.
    pub fn set_reaction_factor(&mut self, reaction_factor: f32) {
        self.reaction_factor = reaction_factor;
    }

    pub fn previous(&self) -> Option<f32> {
        self.previous
    }

    pub fn smooth(&mut self, measured: f32) -> f32 {
        let next = match self.previous {
            None => measured,
            Some(prev) => prev + self.reaction_factor * (measured - prev),
        };
        self.previous = Some(next);
        next
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}
