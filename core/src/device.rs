use std::fmt;

use anyhow::{bail, Result};

/// Compute device requested by a run. `-1` in the configuration selects the
/// CPU, any non-negative id the accelerator with that index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Accelerator(usize),
}

impl Device {
    pub fn from_id(id: i64) -> Result<Self> {
        match id {
            -1 => Ok(Self::Cpu),
            index if index >= 0 => Ok(Self::Accelerator(index as usize)),
            other => bail!("invalid device id {other}: expected -1 for cpu or an accelerator index"),
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Self::Cpu => -1,
            Self::Accelerator(index) => *index as i64,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Accelerator(index) => write!(f, "cuda:{index}"),
        }
    }
}

/// Resolve configured device ids, preserving their order.
pub fn resolve_devices(ids: &[i64]) -> Result<Vec<Device>> {
    ids.iter().map(|&id| Device::from_id(id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cpu_and_accelerator_keep_order() {
        let devices = resolve_devices(&[-1, 0]).unwrap();
        assert_eq!(devices, vec![Device::Cpu, Device::Accelerator(0)]);

        let devices = resolve_devices(&[2, -1, 1]).unwrap();
        assert_eq!(
            devices,
            vec![Device::Accelerator(2), Device::Cpu, Device::Accelerator(1)]
        );
    }

    #[test]
    fn ids_below_minus_one_are_rejected() {
        assert!(resolve_devices(&[0, -2]).is_err());
    }

    #[test]
    fn display_matches_torch_style_names() {
        assert_eq!(Device::Cpu.to_string(), "cpu");
        assert_eq!(Device::Accelerator(3).to_string(), "cuda:3");
    }

    proptest! {
        #[test]
        fn id_round_trips(id in -1i64..64) {
            prop_assert_eq!(Device::from_id(id).unwrap().id(), id);
        }
    }
}
