//! Synthetic welding recordings.
//!
//! Produces the three channels a real data collection folder holds: the
//! current/voltage logger, the microphone and the robot position feed. The
//! weld runs during the middle half of the recording; the torch travels
//! along x at constant speed while it is on.

use crate::channel::{Channel, Column};
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Bernoulli, Normal, Uniform};

pub const LEMBOX: &str = "lembox";
pub const MIC: &str = "mic";
pub const ROBOT: &str = "robot";

const LEMBOX_RATE_HZ: f64 = 20_000.0;
const MIC_RATE_HZ: f64 = 48_000.0;
const ROBOT_RATE_HZ: f64 = 250.0;

const WELD_CURRENT_A: f64 = 150.0;
const WELD_VOLTAGE_V: f64 = 22.0;
const TRAVEL_SPEED_MM_S: f64 = 5.0;
const TORCH_HEIGHT_MM: f64 = 10.0;

/// Probability that a logger sample is lost (recorded as NaN).
const DROPOUT_PROB: f64 = 1e-4;

/// Synthetic recording generator.
pub struct Generator {
    duration_s: f64,
    rng: ChaCha12Rng,
}

impl Generator {
    pub fn new(duration_s: f64, seed: u64) -> Self {
        Self {
            duration_s,
            rng: ChaCha12Rng::seed_from_u64(seed),
        }
    }

    fn weld_interval(&self) -> (f64, f64) {
        (0.25 * self.duration_s, 0.75 * self.duration_s)
    }

    fn n_vals(&self, rate_hz: f64) -> usize {
        (self.duration_s * rate_hz).round() as usize
    }

    /// Generate all channels of one recording.
    pub fn generate(&mut self) -> Result<Vec<Channel>> {
        Ok(vec![
            self.generate_lembox().context("failed to generate lembox channel")?,
            self.generate_mic().context("failed to generate mic channel")?,
            self.generate_robot().context("failed to generate robot channel")?,
        ])
    }

    fn generate_lembox(&mut self) -> Result<Channel> {
        let (weld_start, weld_end) = self.weld_interval();
        let n_vals = self.n_vals(LEMBOX_RATE_HZ);

        let arc_noise = Normal::new(0.0, 1.0)?;
        let dropout = Bernoulli::new(DROPOUT_PROB)?;

        let mut current = Vec::with_capacity(n_vals);
        let mut voltage = Vec::with_capacity(n_vals);
        for i in 0..n_vals {
            let t = i as f64 / LEMBOX_RATE_HZ;
            let on = (weld_start..weld_end).contains(&t);
            let (curr_mean, curr_std, volt_mean, volt_std) = if on {
                (WELD_CURRENT_A, 5.0, WELD_VOLTAGE_V, 1.0)
            } else {
                (0.0, 0.2, 0.0, 0.05)
            };
            let curr = curr_mean + curr_std * arc_noise.sample(&mut self.rng);
            let volt = volt_mean + volt_std * arc_noise.sample(&mut self.rng);

            let lost = i > 0 && dropout.sample(&mut self.rng);
            current.push(if lost { f64::NAN } else { curr });
            voltage.push(if lost { f64::NAN } else { volt });
        }

        Ok(Channel::uniform(
            LEMBOX,
            LEMBOX_RATE_HZ,
            0.0,
            vec![
                Column::new("Current(A)", current),
                Column::new("Voltage(V)", voltage),
            ],
        )?)
    }

    fn generate_mic(&mut self) -> Result<Channel> {
        let (weld_start, weld_end) = self.weld_interval();
        let n_vals = self.n_vals(MIC_RATE_HZ);

        let noise = Normal::new(0.0, 1.0)?;
        let amplitude = (0..n_vals)
            .map(|i| {
                let t = i as f64 / MIC_RATE_HZ;
                let scale = if (weld_start..weld_end).contains(&t) { 0.3 } else { 0.01 };
                scale * noise.sample(&mut self.rng)
            })
            .collect();

        Ok(Channel::uniform(
            MIC,
            MIC_RATE_HZ,
            0.0,
            vec![Column::new("Amplitude", amplitude)],
        )?)
    }

    /// Robot feed with timestamps jittered within a fifth of the sample period.
    fn generate_robot(&mut self) -> Result<Channel> {
        let (weld_start, weld_end) = self.weld_interval();
        let n_vals = self.n_vals(ROBOT_RATE_HZ);

        let jitter = Uniform::new(0.0, 0.2 / ROBOT_RATE_HZ)?;
        let wobble = Normal::new(0.0, 0.01)?;

        let mut time = Vec::with_capacity(n_vals);
        let mut pos_x = Vec::with_capacity(n_vals);
        let mut pos_y = Vec::with_capacity(n_vals);
        let mut pos_z = Vec::with_capacity(n_vals);
        for i in 0..n_vals {
            let t = i as f64 / ROBOT_RATE_HZ + jitter.sample(&mut self.rng);
            let travel = (t.clamp(weld_start, weld_end) - weld_start) * TRAVEL_SPEED_MM_S;
            time.push(t);
            pos_x.push(travel);
            pos_y.push(wobble.sample(&mut self.rng));
            pos_z.push(TORCH_HEIGHT_MM + wobble.sample(&mut self.rng));
        }

        Ok(Channel::new(
            ROBOT,
            ROBOT_RATE_HZ,
            time,
            vec![
                Column::new("Pos_x(mm)", pos_x),
                Column::new("Pos_y(mm)", pos_y),
                Column::new("Pos_z(mm)", pos_z),
            ],
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::find_active_region;
    use crate::stats::rolling_mean;

    #[test]
    fn channels_are_well_formed() {
        let channels = Generator::new(0.5, 3).generate().unwrap();
        let names: Vec<_> = channels.iter().map(|ch| ch.name()).collect();
        assert_eq!(names, vec![LEMBOX, MIC, ROBOT]);

        for ch in &channels {
            ch.validate().unwrap();
            ch.check_monotonic().unwrap();
            assert_eq!(ch.len(), (0.5 * ch.rate_hz()).round() as usize);
        }
    }

    #[test]
    fn same_seed_same_recording() {
        let first = Generator::new(0.2, 9).generate().unwrap();
        let second = Generator::new(0.2, 9).generate().unwrap();
        let bytes = |channels: &Vec<Channel>| rmp_serde::to_vec(channels).unwrap();
        assert_eq!(bytes(&first), bytes(&second));
    }

    #[test]
    fn weld_is_detectable() {
        let channels = Generator::new(1.0, 5).generate().unwrap();
        let voltage = channels[0].column("Voltage(V)").unwrap();
        let avg = rolling_mean(voltage, 200).unwrap().aligned();

        let region = find_active_region(&avg, 1.0).unwrap();
        let t_start = channels[0].time()[region.start];
        let t_end = channels[0].time()[region.end - 1];
        assert!((t_start - 0.25).abs() < 0.02, "start {t_start}");
        assert!((t_end - 0.75).abs() < 0.02, "end {t_end}");
    }
}
