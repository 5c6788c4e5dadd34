fn main() {
    if let Ok(output) = std::process::Command::new("date")
        .arg("-u")
        .arg("+%Y-%m-%dT%H:%M:%SZ")
        .output()
    {
        if output.status.success() {
            let ts = String::from_utf8_lossy(&output.stdout).trim().to_string();
            println!("cargo:rustc-env=BUILD_TIMESTAMP={ts}");
        }
    }
}
