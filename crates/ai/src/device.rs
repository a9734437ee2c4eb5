use candle_core::{utils, Device};
use strum_macros::{AsRefStr, Display, EnumString};

/// Which compute device the model is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DevicePreference {
    /// cuda, then metal, then cpu
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl DevicePreference {
    pub fn select(self) -> candle_core::Result<Device> {
        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda => Device::new_cuda(0),
            Self::Metal => Device::new_metal(0),
            Self::Auto => {
                if utils::cuda_is_available() {
                    Device::new_cuda(0)
                } else if utils::metal_is_available() {
                    Device::new_metal(0)
                } else {
                    Ok(Device::Cpu)
                }
            }
        }
    }
}

#[test]
fn test_parse_device_preference() {
    use std::str::FromStr;

    assert_eq!(DevicePreference::from_str("cpu").unwrap(), DevicePreference::Cpu);
    assert_eq!(DevicePreference::from_str("CUDA").unwrap(), DevicePreference::Cuda);
    assert_eq!(DevicePreference::from_str("auto").unwrap(), DevicePreference::Auto);
    assert!(DevicePreference::from_str("tpu").is_err());
    assert_eq!(DevicePreference::Metal.to_string(), "metal");
}

#[cfg(not(any(feature = "cuda", feature = "metal")))]
#[test]
fn test_auto_falls_back_to_cpu() {
    assert!(DevicePreference::Auto.select().unwrap().is_cpu());
    assert!(DevicePreference::Cuda.select().is_err());
}
