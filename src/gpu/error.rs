use super::structs::Format;

/// The closed set of result codes visible to clients.
///
/// Non-negative codes are statuses, negative ones are errors. The raw values
/// line up with the explicit API's numbering so they can be forwarded as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "dashi-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResultCode {
    Success,
    NotReady,
    Timeout,
    EventSet,
    EventReset,
    Incomplete,
    ErrorOutOfHostMemory,
    ErrorOutOfDeviceMemory,
    ErrorInitializationFailed,
    ErrorDeviceLost,
    ErrorFeatureNotPresent,
    ErrorFormatNotSupported,
    ErrorInvalidState,
    ErrorValidationFailed,
}

impl ResultCode {
    pub fn as_raw(self) -> i32 {
        match self {
            ResultCode::Success => 0,
            ResultCode::NotReady => 1,
            ResultCode::Timeout => 2,
            ResultCode::EventSet => 3,
            ResultCode::EventReset => 4,
            ResultCode::Incomplete => 5,
            ResultCode::ErrorOutOfHostMemory => -1,
            ResultCode::ErrorOutOfDeviceMemory => -2,
            ResultCode::ErrorInitializationFailed => -3,
            ResultCode::ErrorDeviceLost => -4,
            ResultCode::ErrorFeatureNotPresent => -8,
            ResultCode::ErrorFormatNotSupported => -11,
            // Both map onto the validation range; the explicit API has no
            // dedicated "wrong state" code.
            ResultCode::ErrorInvalidState => -1_000_011_001,
            ResultCode::ErrorValidationFailed => -1_000_011_001,
        }
    }

    pub fn is_error(self) -> bool {
        self.as_raw() < 0
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GPUError {
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("feature not present: {0}")]
    FeatureNotPresent(&'static str),
    #[error("out of host memory")]
    OutOfHostMemory,
    #[error("out of device memory")]
    OutOfDeviceMemory,
    #[error("device lost: {0}")]
    DeviceLost(String),
    #[error("invalid or destroyed handle: {0}")]
    InvalidHandle(&'static str),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("render pass needs {expected} clear values, {supplied} supplied")]
    ClearValueMismatch { expected: usize, supplied: usize },
    #[error("format not supported: {0:?}")]
    FormatNotSupported(Format),
    #[error("timed out")]
    Timeout,
    #[error("ran out of slots")]
    SlotError,
}

impl GPUError {
    pub fn code(&self) -> ResultCode {
        match self {
            GPUError::InvalidState(_) => ResultCode::ErrorInvalidState,
            GPUError::FeatureNotPresent(_) => ResultCode::ErrorFeatureNotPresent,
            GPUError::OutOfHostMemory | GPUError::SlotError => ResultCode::ErrorOutOfHostMemory,
            GPUError::OutOfDeviceMemory => ResultCode::ErrorOutOfDeviceMemory,
            GPUError::DeviceLost(_) => ResultCode::ErrorDeviceLost,
            GPUError::InvalidHandle(_)
            | GPUError::Validation(_)
            | GPUError::ClearValueMismatch { .. } => ResultCode::ErrorValidationFailed,
            GPUError::FormatNotSupported(_) => ResultCode::ErrorFormatNotSupported,
            GPUError::Timeout => ResultCode::Timeout,
        }
    }

    /// Fatal errors latch the device into the lost state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GPUError::DeviceLost(_) | GPUError::OutOfDeviceMemory | GPUError::OutOfHostMemory
        )
    }

    /// Errors that leave a recording command buffer usable. Everything else
    /// raised while recording poisons it.
    pub fn preserves_recording(&self) -> bool {
        matches!(self, GPUError::FeatureNotPresent(_))
    }
}

impl<T> From<&Result<T>> for ResultCode {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => ResultCode::Success,
            Err(e) => e.code(),
        }
    }
}

/// Convenient crate-wide result type.
pub type Result<T, E = GPUError> = std::result::Result<T, E>;
