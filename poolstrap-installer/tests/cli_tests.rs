use clap::Parser;
use poolstrap_core::vdev::RedundancyMode;
use poolstrap_installer::cli::{Cli, Command};

#[test]
fn install_requires_at_least_one_device() {
    let result = Cli::try_parse_from(["poolstrap", "install"]);
    assert!(result.is_err());
}

#[test]
fn install_parses_devices_in_order() {
    let cli = Cli::try_parse_from([
        "poolstrap",
        "install",
        "--device",
        "/dev/disk/by-id/ata-A",
        "--device",
        "/dev/disk/by-id/ata-B",
    ])
    .unwrap();

    match cli.command {
        Command::Install { devices, mode, execute, yes_i_know, .. } => {
            assert_eq!(
                devices,
                vec!["/dev/disk/by-id/ata-A", "/dev/disk/by-id/ata-B"]
            );
            assert_eq!(mode, RedundancyMode::Mirror);
            assert!(!execute);
            assert!(!yes_i_know);
        }
        _ => panic!("expected install command"),
    }
}

#[test]
fn install_parses_every_redundancy_mode() {
    for (flag, expected) in [
        ("stripe", RedundancyMode::Stripe),
        ("mirror", RedundancyMode::Mirror),
        ("striped-mirror", RedundancyMode::StripedMirror),
        ("raidz1", RedundancyMode::RaidZ1),
        ("raidz2", RedundancyMode::RaidZ2),
        ("raidz3", RedundancyMode::RaidZ3),
    ] {
        let cli = Cli::try_parse_from([
            "poolstrap",
            "install",
            "--device",
            "/dev/disk/by-id/ata-A",
            "--mode",
            flag,
        ])
        .unwrap();
        match cli.command {
            Command::Install { mode, .. } => assert_eq!(mode, expected, "flag {}", flag),
            _ => panic!("expected install command"),
        }
    }
}

#[test]
fn unknown_redundancy_mode_is_rejected() {
    let result = Cli::try_parse_from([
        "poolstrap",
        "install",
        "--device",
        "/dev/disk/by-id/ata-A",
        "--mode",
        "raid5",
    ]);
    assert!(result.is_err());
}

#[test]
fn install_accepts_encryption_and_layout_flags() {
    let cli = Cli::try_parse_from([
        "poolstrap",
        "install",
        "--device",
        "/dev/disk/by-id/ata-A",
        "--encrypt-root",
        "--username",
        "alice",
        "--root-gib",
        "64",
        "--swap-gib",
        "16",
        "--execute",
        "--yes-i-know",
    ])
    .unwrap();

    match cli.command {
        Command::Install {
            encrypt_root,
            encrypt_home,
            username,
            root_gib,
            swap_gib,
            execute,
            yes_i_know,
            ..
        } => {
            assert!(encrypt_root);
            assert!(!encrypt_home);
            assert_eq!(username, "alice");
            assert_eq!(root_gib, 64);
            assert_eq!(swap_gib, 16);
            assert!(execute);
            assert!(yes_i_know);
        }
        _ => panic!("expected install command"),
    }
}

#[test]
fn global_dry_run_flag_is_accepted_after_subcommand() {
    let cli = Cli::try_parse_from([
        "poolstrap",
        "install",
        "--device",
        "/dev/disk/by-id/ata-A",
        "--dry-run",
    ])
    .unwrap();
    assert!(cli.dry_run);
}

#[test]
fn restart_parses_custom_state_path() {
    let cli = Cli::try_parse_from(["poolstrap", "restart", "--state", "/tmp/state.json"]).unwrap();
    match cli.command {
        Command::Restart { state } => {
            assert_eq!(state.to_string_lossy(), "/tmp/state.json");
        }
        _ => panic!("expected restart command"),
    }
}
