fn main() {
    // macOS: CBCentralManager stays "unauthorised" and never scans unless the
    // binary embeds an Info.plist with NSBluetoothAlwaysUsageDescription.
    // CLI tools can carry one in the __TEXT,__info_plist Mach-O section.
    //
    // `CARGO_CFG_TARGET_OS` is the target, not the host, so cross builds work.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("macos") {
        let Ok(dir) = std::env::var("CARGO_MANIFEST_DIR") else {
            println!("cargo:warning=CARGO_MANIFEST_DIR unset; Info.plist not embedded");
            return;
        };
        let plist = format!("{dir}/Info.plist");

        println!("cargo:rustc-link-arg-bins=-sectcreate");
        println!("cargo:rustc-link-arg-bins=__TEXT");
        println!("cargo:rustc-link-arg-bins=__info_plist");
        println!("cargo:rustc-link-arg-bins={plist}");
        println!("cargo:rerun-if-changed=Info.plist");
    }
}
