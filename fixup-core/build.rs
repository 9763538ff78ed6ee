fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Pass through FIXUP_GIT_HASH from the packaging environment
    println!("cargo:rerun-if-env-changed=FIXUP_GIT_HASH");
    if let Ok(hash) = std::env::var("FIXUP_GIT_HASH") {
        println!("cargo:rustc-env=FIXUP_GIT_HASH={}", hash);
    }
}
