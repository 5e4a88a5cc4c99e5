use anyhow::Result;
use burn_autodiff::Autodiff;
use burn_candle::{Candle, CandleDevice};
use cilrun_core::{Device, Runtime};
use tracing::debug;

pub type InferenceBackend = Candle<f32, i64>;
pub type TrainingBackend = Autodiff<InferenceBackend>;

pub fn candle_device(device: Device) -> Result<CandleDevice> {
    match device {
        Device::Cpu => Ok(CandleDevice::Cpu),
        #[cfg(feature = "cuda")]
        Device::Accelerator(index) => Ok(CandleDevice::cuda(index)),
        #[cfg(not(feature = "cuda"))]
        Device::Accelerator(index) => anyhow::bail!(
            "device cuda:{index} requested but this build has no `cuda` feature"
        ),
    }
}

/// Candle keeps no global generator; every random draw in the learners comes
/// from an rng seeded with the run seed, and its CPU kernels have no
/// nondeterministic variants to switch off. Both hooks only log.
#[derive(Debug, Default)]
pub struct CandleRuntime;

impl Runtime for CandleRuntime {
    fn seed_all(&mut self, seed: u64) {
        debug!(seed, "candle has no global rng; learners derive theirs from the run seed");
    }

    fn enable_determinism(&mut self) {
        debug!("candle kernels are deterministic, nothing to configure");
    }

    fn check_device(&self, device: Device) -> Result<()> {
        candle_device(device).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_is_always_available() {
        let runtime = CandleRuntime;
        assert!(runtime.check_device(Device::Cpu).is_ok());
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn accelerator_needs_cuda_feature() {
        let runtime = CandleRuntime;
        let err = runtime.check_device(Device::Accelerator(0)).unwrap_err();
        assert!(err.to_string().contains("cuda:0"));
    }

    #[test]
    fn runtime_hooks_keep_no_state() {
        let mut runtime = CandleRuntime;
        runtime.seed_all(1993);
        runtime.enable_determinism();
        assert_eq!(std::mem::size_of::<CandleRuntime>(), 0);
        assert!(runtime.check_device(Device::Cpu).is_ok());
    }
}
