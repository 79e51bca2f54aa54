use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    #[cfg(feature = "auto")]
    select_file_reader_feature();
}

#[allow(unused)]
fn select_file_reader_feature() {
    // `build.rs` runs on the host; the target family comes from Cargo.
    let file_reader_feature =
        match env::var("CARGO_CFG_TARGET_FAMILY").as_deref() {
            Ok("unix") => "mmap",
            _ => "fs",
        };

    println!(r#"cargo:rustc-cfg=feature="{file_reader_feature}""#);
}
