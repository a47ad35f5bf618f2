// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! build.rs for pdiprog firmware

use jiff::Timestamp;

fn main() {
    println!("cargo:rerun-if-env-changed=ESP_LOG");
    println!("cargo:rerun-if-env-changed=PDIPROG_SPEED");
    println!("cargo:rerun-if-env-changed=PDIPROG_RETRIES");
    println!("cargo:rerun-if-env-changed=PDIPROG_TIMEOUT_MS");
    println!("cargo:rerun-if-changed=build.rs");

    // Same source and formatting as esp-bootloader-esp-idf, as these are
    // passed into the esp_app_desc! macro.
    let build_time = Timestamp::now();
    let build_time_formatted = build_time.strftime("%H:%M:%S");
    let build_date_formatted = build_time.strftime("%Y-%m-%d");
    println!("cargo::rustc-env=PDIPROG_BUILD_TIME={build_time_formatted}");
    println!("cargo::rustc-env=PDIPROG_BUILD_DATE={build_date_formatted}");

    linker_be_nice();
    // make sure linkall.x is the last linker script (otherwise might cause problems with flip-link)
    println!("cargo:rustc-link-arg=-Tlinkall.x");

    built::write_built_file().expect("Failed to acquire build-time information");
}

// Invoked by the linker, via --error-handling-script, on link failure
fn linker_be_nice() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 2 {
        let kind = &args[1];
        let what = &args[2];

        match kind.as_str() {
            "undefined-symbol" => match what.as_str() {
                "_stack_start" => {
                    eprintln!();
                    eprintln!("💡 Is the linker script `linkall.x` missing?");
                    eprintln!();
                }
                "_embassy_time_schedule_wake" | "_embassy_time_now" => {
                    eprintln!();
                    eprintln!(
                        "💡 No embassy time driver - make sure esp_hal_embassy::init() is called"
                    );
                    eprintln!();
                }
                _ => (),
            },
            _ => {
                std::process::exit(1);
            }
        }

        std::process::exit(0);
    }

    println!(
        "cargo:rustc-link-arg=--error-handling-script={}",
        std::env::current_exe().unwrap().display()
    );
}
