fn main() {
    // Shown by `--version` and the startup banner
    let date = chrono::Utc::now().format("%Y-%m-%d");
    println!("cargo:rustc-env=BUILD_DATE={}", date);
}
