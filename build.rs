fn main() {
    // Expose the build timestamp to the facade crate
    let stamp = chrono::Utc::now().format("%Y-%m-%d %H:%M UTC").to_string();
    println!("cargo:rustc-env=BUILD_DATE={stamp}");
}
