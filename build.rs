fn main() {
    // Build scripts run on the host; only pull in the ESP-IDF build
    // environment when cross-compiling for the Xtensa device target.
    if let Ok(target) = std::env::var("TARGET") {
        if target.contains("xtensa") {
            embuild::espidf::sysenv::output();
        }
    }
}
