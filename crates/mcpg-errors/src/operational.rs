/// Outcome of an environment probe (C8): a separate `errors` (fatal) and
/// `warnings` (non-fatal) list, never thrown — the caller inspects it.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OperationalResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl OperationalResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn push_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn is_healthy(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(mut self, other: Self) -> Self {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self
    }
}
