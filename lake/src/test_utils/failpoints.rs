use fail::FailScenario;

/// Configures failpoints for the lifetime of the guard and turns them off on drop.
///
/// Holding the guard also serializes tests that use failpoints.
pub struct FailpointGuard<'a> {
    _scenario: FailScenario<'a>,
    names: Vec<String>,
}

impl FailpointGuard<'_> {
    pub fn setup(failpoints: &[(&str, &str)]) -> Self {
        let scenario = FailScenario::setup();
        let mut names = Vec::with_capacity(failpoints.len());
        for (name, action) in failpoints {
            fail::cfg(*name, action).expect("valid failpoint action");
            names.push(name.to_string());
        }

        Self {
            _scenario: scenario,
            names,
        }
    }
}

impl Drop for FailpointGuard<'_> {
    fn drop(&mut self) {
        for name in &self.names {
            fail::remove(name);
        }
    }
}
