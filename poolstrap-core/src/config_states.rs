//! TypeState helpers for installer configs (validation -> arming -> executing).
//!
//! This encodes safety invariants in types so destructive operations can only be invoked once a
//! config is validated and explicitly armed.

use poolstrap_error::InstallError;
use anyhow::Result;

#[derive(Debug, Clone, Copy)]
pub struct ExecuteArmToken(());

impl ExecuteArmToken {
    pub fn try_new(yes_i_know: bool) -> Result<Self> {
        if !yes_i_know {
            return Err(InstallError::MissingYesIKnow.into());
        }
        Ok(Self(()))
    }
}

pub trait ValidateConfig {
    fn validate_cfg(&self) -> Result<()>;
}

pub trait HasRunMode {
    fn is_dry_run(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct UnvalidatedConfig<T>(pub T);

#[derive(Debug, Clone)]
pub struct ValidatedConfig<T>(pub T);

#[derive(Debug, Clone)]
pub struct ArmedConfig<T> {
    pub cfg: T,
    pub token: ExecuteArmToken,
}

impl<T> UnvalidatedConfig<T> {
    pub fn new(cfg: T) -> Self {
        Self(cfg)
    }
}

impl<T: ValidateConfig> UnvalidatedConfig<T> {
    pub fn validate(self) -> Result<ValidatedConfig<T>> {
        self.0.validate_cfg()?;
        Ok(ValidatedConfig(self.0))
    }
}

impl<T: HasRunMode> ValidatedConfig<T> {
    pub fn arm_execute(self, token: ExecuteArmToken) -> Result<ArmedConfig<T>> {
        if self.0.is_dry_run() {
            anyhow::bail!("cannot arm an execute token for a dry-run config");
        }
        Ok(ArmedConfig { cfg: self.0, token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Cfg {
        dry_run: bool,
    }

    impl ValidateConfig for Cfg {
        fn validate_cfg(&self) -> Result<()> {
            Ok(())
        }
    }

    impl HasRunMode for Cfg {
        fn is_dry_run(&self) -> bool {
            self.dry_run
        }
    }

    #[test]
    fn arming_requires_yes_i_know() {
        assert!(ExecuteArmToken::try_new(false).is_err());
        assert!(ExecuteArmToken::try_new(true).is_ok());
    }

    #[test]
    fn dry_run_configs_cannot_be_armed() {
        let validated = UnvalidatedConfig::new(Cfg { dry_run: true })
            .validate()
            .unwrap();
        let token = ExecuteArmToken::try_new(true).unwrap();
        assert!(validated.arm_execute(token).is_err());
    }
}
