use poolstrap_core::InstallError;

fn main() {
    if let Err(err) = poolstrap_installer::run() {
        // Interrupts get a distinct exit status so wrapping scripts can tell
        // an operator abort from a genuine failure.
        let interrupted = err
            .downcast_ref::<InstallError>()
            .is_some_and(|e| matches!(e, InstallError::Interrupted));

        eprintln!("Error: {:#}", err);
        std::process::exit(if interrupted { 130 } else { 1 });
    }
}
