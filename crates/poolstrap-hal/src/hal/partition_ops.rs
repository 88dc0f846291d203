//! Partitioning operations (wipefs/sgdisk).

use poolstrap_error::HalResult;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct WipeFsOptions {
    pub dry_run: bool,
    pub confirmed: bool,
}

impl WipeFsOptions {
    pub fn new(dry_run: bool, confirmed: bool) -> Self {
        Self { dry_run, confirmed }
    }
}

#[derive(Debug, Clone)]
pub struct SgdiskOptions {
    pub dry_run: bool,
    pub confirmed: bool,
}

impl SgdiskOptions {
    pub fn new(dry_run: bool, confirmed: bool) -> Self {
        Self { dry_run, confirmed }
    }
}

/// A single `sgdisk` operation on a GPT partition table.
///
/// Partition numbers are explicit so the resulting layout is deterministic
/// given the same input sequence; `first`/`last` use sgdisk's sector grammar
/// ("0" = next/last aligned sector, "+2G" = relative size, "-8G" = from end).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SgdiskOp {
    ZapAll,
    New {
        number: u32,
        first: String,
        last: String,
        type_code: String,
        label: String,
    },
    Print,
}

impl SgdiskOp {
    pub fn to_args(&self) -> Vec<String> {
        match self {
            SgdiskOp::ZapAll => vec!["--zap-all".to_string()],
            SgdiskOp::New {
                number,
                first,
                last,
                type_code,
                label,
            } => vec![
                format!("-n{}:{}:{}", number, first, last),
                format!("-t{}:{}", number, type_code),
                format!("-c{}:{}", number, label),
            ],
            SgdiskOp::Print => vec!["--print".to_string()],
        }
    }
}

pub trait PartitionOps {
    fn wipefs_all(&self, disk: &Path, opts: &WipeFsOptions) -> HalResult<()>;

    /// Execute a single `sgdisk` operation on the given disk.
    fn sgdisk(&self, disk: &Path, op: SgdiskOp, opts: &SgdiskOptions) -> HalResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_op_renders_number_type_and_label() {
        let op = SgdiskOp::New {
            number: 3,
            first: "0".to_string(),
            last: "+32G".to_string(),
            type_code: "BF00".to_string(),
            label: "RPOOL".to_string(),
        };
        assert_eq!(op.to_args(), vec!["-n3:0:+32G", "-t3:BF00", "-c3:RPOOL"]);
    }

    #[test]
    fn zap_all_renders_single_flag() {
        assert_eq!(SgdiskOp::ZapAll.to_args(), vec!["--zap-all"]);
    }
}
