use std::env;
use std::error::Error;
use std::process::Command;

use simple_error::bail;
use vergen::EmitBuilder;

fn exec_git(args: &[&str]) -> Result<String, Box<dyn Error>> {
    let output = Command::new("git").args(args).output()?;
    if !output.status.success() {
        bail!("git {} exited with {}", args.join(" "), output.status);
    }
    let out = String::from_utf8(output.stdout)?;
    let out = out.trim();
    if out.is_empty() {
        bail!("git {} returned empty output", args.join(" "));
    }
    Ok(out.to_string())
}

fn main() -> Result<(), Box<dyn Error>> {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=.git/HEAD");

    EmitBuilder::builder()
        .build_timestamp()
        .rustc_semver()
        .rustc_llvm_version()
        .rustc_channel()
        .emit()?;

    let pkg_version = env::var("CARGO_PKG_VERSION")?;
    let version = match exec_git(&["describe", "--tags", "--exact-match", "HEAD"]) {
        Ok(tag) => tag,
        Err(_) => match exec_git(&["rev-parse", "--short", "HEAD"]) {
            Ok(sha) => format!("{pkg_version}-dev_{sha}"),
            Err(_) => pkg_version,
        },
    };
    let sha = exec_git(&["rev-parse", "HEAD"]).unwrap_or_else(|_| String::from("unknown"));

    let build_type = env::var("PROFILE").unwrap_or_else(|_| String::from("unknown"));
    let build_target = env::var("TARGET").unwrap_or_else(|_| String::from("unknown"));

    println!("cargo:rustc-env=BUILD_VERSION={version}");
    println!("cargo:rustc-env=BUILD_SHA={sha}");
    println!("cargo:rustc-env=BUILD_TYPE={build_type}");
    println!("cargo:rustc-env=BUILD_TARGET={build_target}");

    Ok(())
}
