fn main() {
    // The firmware configuration is embedded at compile time.
    println!("cargo:rerun-if-changed=cfg.toml");
    println!("cargo:rustc-link-arg=-Tlinkall.x");
}
