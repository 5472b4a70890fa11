pub mod arm_error;
pub mod azure;
pub mod driver;
pub mod error;
pub mod local;

pub use arm_error::{
    decode_arm_error, decode_arm_error_value, AdditionalInfo, AzureError, PolicyInfo,
    POLICY_DENIAL_CODE,
};
pub use azure::{AzureDriver, AzureDriverConfig, PollSchedule};
pub use driver::Driver;
pub use error::DriverError;
pub use local::{LocalDriver, PortPolicy, SimulatedPolicies};
