use std::process::Command;
use std::{env, fs, io, path::PathBuf};

fn main() -> io::Result<()> {
    let dir = "shaders";
    println!("cargo:rerun-if-changed={dir}");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");

    let exe_suffix = if cfg!(target_os = "windows") {
        ".exe"
    } else {
        Default::default()
    };

    // Falls back to whatever `glslc` is on PATH.
    let glslc_path = match env::var("VULKAN_SDK") {
        Ok(sdk_path) => PathBuf::from(sdk_path)
            .join("Bin")
            .join(format!("glslc{exe_suffix}")),
        Err(_) => PathBuf::from(format!("glslc{exe_suffix}")),
    };

    fs::create_dir_all("intermediate/shaders")?;

    let mut file_paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let extension = path.extension().and_then(|extension| extension.to_str());

        if path.is_file() && matches!(extension, Some("vert") | Some("frag")) {
            file_paths.push(path);
        }
    }

    for path in file_paths {
        let Some(filename) = path.file_name().and_then(|filename| filename.to_str()) else {
            continue;
        };
        let output_filename = format!("intermediate/shaders/{filename}.spv");

        match Command::new(&glslc_path)
            .arg("--target-env=vulkan1.3")
            .arg("-O")
            .arg("-o")
            .arg(&output_filename)
            .arg(&path)
            .status()
        {
            Ok(status) if status.success() => {
                println!("cargo:warning=Compiled shader: {filename}");
            }
            Ok(status) => panic!("Failed to compile shader with glslc ({status}): {filename}"),
            Err(error) => {
                println!("cargo:warning=glslc unavailable ({error}), skipping {filename}");
            }
        }
    }

    Ok(())
}
