//! Emulator detection from `android.os.Build` properties.

/// Identity strings read from `android.os.Build`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceIdentity {
    pub brand: String,
    pub device: String,
    pub fingerprint: String,
    pub hardware: String,
    pub model: String,
    pub manufacturer: String,
    pub product: String,
}

impl DeviceIdentity {
    pub fn is_emulator(&self) -> bool {
        classify(
            &self.brand,
            &self.device,
            &self.fingerprint,
            &self.hardware,
            &self.model,
            &self.manufacturer,
            &self.product,
        )
    }
}

const EMULATOR_MODELS: &[&str] = &["google_sdk", "Emulator", "Android SDK built for x86"];

const EMULATOR_PRODUCTS: &[&str] = &[
    "sdk_google",
    "google_sdk",
    "sdk",
    "sdk_x86",
    "vbox86p",
    "emulator",
    "simulator",
];

/// Returns `true` when any of the build properties look like an emulator or
/// a virtualized device. All comparisons are case-sensitive.
pub fn classify(
    brand: &str,
    device: &str,
    fingerprint: &str,
    hardware: &str,
    model: &str,
    manufacturer: &str,
    product: &str,
) -> bool {
    (brand.starts_with("generic") && device.starts_with("generic"))
        || fingerprint.starts_with("generic")
        || fingerprint.starts_with("unknown")
        || hardware.contains("goldfish")
        || hardware.contains("ranchu")
        || EMULATOR_MODELS.iter().any(|needle| model.contains(needle))
        || manufacturer.contains("Genymotion")
        || EMULATOR_PRODUCTS.iter().any(|needle| product.contains(needle))
}

/// Tri-state emulator flag as cached by the registry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EmulatorState {
    Unknown,
    No,
    Yes,
}

impl EmulatorState {
    /// Collapses `Unknown` to `false` for external consumers.
    pub fn as_bool(self) -> bool {
        matches!(self, EmulatorState::Yes)
    }
}

impl From<Option<bool>> for EmulatorState {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => EmulatorState::Unknown,
            Some(false) => EmulatorState::No,
            Some(true) => EmulatorState::Yes,
        }
    }
}
