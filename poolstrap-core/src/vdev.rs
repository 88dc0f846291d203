//! Redundancy-group composition and validation.
//!
//! `compose` is pure: it validates a mode/member combination and renders the
//! device-group specification consumed by `zpool create`. All validation here
//! happens before the first destructive command of a run.

use poolstrap_error::InstallError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Size mismatch tolerance between group members, as a percentage of the
/// first enumerated member's size.
pub const SIZE_TOLERANCE_PCT: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedundancyMode {
    /// Plain concatenation; no redundancy.
    Stripe,
    /// Every member holds a full copy.
    Mirror,
    /// Consecutive pairs of mirrors, striped together.
    StripedMirror,
    /// Single parity, tolerates one member failure.
    RaidZ1,
    /// Double parity.
    RaidZ2,
    /// Triple parity.
    RaidZ3,
}

impl RedundancyMode {
    pub fn min_devices(self) -> usize {
        match self {
            RedundancyMode::Stripe => 1,
            RedundancyMode::Mirror => 2,
            RedundancyMode::StripedMirror => 4,
            RedundancyMode::RaidZ1 => 3,
            RedundancyMode::RaidZ2 => 4,
            RedundancyMode::RaidZ3 => 5,
        }
    }

    pub fn requires_even_count(self) -> bool {
        matches!(self, RedundancyMode::StripedMirror)
    }

    /// Whether the mode stores redundant copies/parity, which requires
    /// members to be size-matched.
    pub fn is_redundant(self) -> bool {
        !matches!(self, RedundancyMode::Stripe)
    }

    fn keyword(self) -> Option<&'static str> {
        match self {
            RedundancyMode::Stripe => None,
            RedundancyMode::Mirror | RedundancyMode::StripedMirror => Some("mirror"),
            RedundancyMode::RaidZ1 => Some("raidz"),
            RedundancyMode::RaidZ2 => Some("raidz2"),
            RedundancyMode::RaidZ3 => Some("raidz3"),
        }
    }
}

impl fmt::Display for RedundancyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RedundancyMode::Stripe => "stripe",
            RedundancyMode::Mirror => "mirror",
            RedundancyMode::StripedMirror => "striped-mirror",
            RedundancyMode::RaidZ1 => "raidz1",
            RedundancyMode::RaidZ2 => "raidz2",
            RedundancyMode::RaidZ3 => "raidz3",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for RedundancyMode {
    type Err = InstallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(RedundancyMode::Stripe),
            "mirror" => Ok(RedundancyMode::Mirror),
            "striped-mirror" => Ok(RedundancyMode::StripedMirror),
            "raidz" | "raidz1" => Ok(RedundancyMode::RaidZ1),
            "raidz2" => Ok(RedundancyMode::RaidZ2),
            "raidz3" => Ok(RedundancyMode::RaidZ3),
            other => Err(InstallError::Validation(format!(
                "unknown redundancy mode '{}' (expected stripe, mirror, striped-mirror, raidz1, raidz2 or raidz3)",
                other
            ))),
        }
    }
}

/// One same-role partition contributed by one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VdevMember {
    pub node: PathBuf,
    pub size_bytes: u64,
}

/// Validated device-group specification, ready to splice into `zpool create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VdevSpec {
    pub args: Vec<String>,
}

/// Validate `members` against `mode` and render the group specification.
///
/// The reference size for the tolerance check is always the first enumerated
/// member, and mismatches are reported relative to it.
pub fn compose(mode: RedundancyMode, members: &[VdevMember]) -> Result<VdevSpec, InstallError> {
    if members.len() < mode.min_devices() {
        return Err(InstallError::Validation(format!(
            "{} requires at least {} devices, got {}",
            mode,
            mode.min_devices(),
            members.len()
        )));
    }
    if mode.requires_even_count() && members.len() % 2 != 0 {
        return Err(InstallError::Validation(format!(
            "{} requires an even device count, got {}",
            mode,
            members.len()
        )));
    }
    if mode.is_redundant() {
        check_size_tolerance(members)?;
    }

    let nodes = || members.iter().map(|m| m.node.display().to_string());
    let args = match mode {
        RedundancyMode::Stripe => nodes().collect(),
        RedundancyMode::StripedMirror => {
            let mut args = Vec::new();
            for pair in members.chunks(2) {
                args.push("mirror".to_string());
                args.extend(pair.iter().map(|m| m.node.display().to_string()));
            }
            args
        }
        _ => {
            // keyword() is always Some for the remaining redundant modes.
            let mut args = vec![mode.keyword().unwrap_or_default().to_string()];
            args.extend(nodes());
            args
        }
    };

    Ok(VdevSpec { args })
}

fn check_size_tolerance(members: &[VdevMember]) -> Result<(), InstallError> {
    let reference = &members[0];
    for member in &members[1..] {
        let diff = member.size_bytes.abs_diff(reference.size_bytes);
        if diff * 100 > reference.size_bytes * SIZE_TOLERANCE_PCT {
            return Err(InstallError::Validation(format!(
                "partition {} ({} bytes) differs from {} ({} bytes) by more than {}%; \
                 redundant groups need size-matched members",
                member.node.display(),
                member.size_bytes,
                reference.node.display(),
                reference.size_bytes,
                SIZE_TOLERANCE_PCT
            )));
        }
    }
    Ok(())
}
