use talentbridge::settings::*;

fn main() {
    // Load settings from the default location
    let project_settings = parse_settings(None).unwrap();
    println!("Loaded settings: {:?}", project_settings);

    // Attempt to load from an invalid path (expected to fail)
    let is_err = parse_settings(Some("")).is_err();
    println!("Error on invalid path: {:?}", is_err);

    // Environment overrides are applied on top of the file
    // $ TALENTBRIDGE__REALTIME__MAX_RECONNECT_ATTEMPTS=2 cargo run --bin settings_demo
    println!(
        "Reconnect: {} attempts, base delay {:?}",
        project_settings.realtime.max_reconnect_attempts,
        project_settings.realtime.reconnect_base_delay()
    );

    // Attempt to load from a custom path
    // $ cargo run --bin settings_demo -- --settings=settings/release.toml
    let cli = Cli::parse();
    let project_settings = parse_settings(cli.settings.as_deref()).unwrap();
    println!("Loaded settings: {:?}", project_settings);
}
