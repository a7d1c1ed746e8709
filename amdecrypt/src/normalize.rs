use crate::{Error, Result};
use colored::Colorize;
use log::{debug, info, warn};
use std::{
    env,
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

/// All-zero key pair. The muxed file is already in the clear, the run only
/// rewrites the leftover protection boxes.
pub const ZERO_KEY: &str = "00000000000000000000000000000000:00000000000000000000000000000000";

/// Resolve `program` the way a shell would: as given when it contains a path
/// separator or exists relative to the working directory, otherwise through
/// `PATH`.
pub fn find_executable(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 || program.exists() {
        return program.exists().then(|| program.to_owned());
    }

    let names = if cfg!(target_os = "windows") && program.extension().is_none() {
        vec![program.with_extension("exe"), program.to_owned()]
    } else {
        vec![program.to_owned()]
    };

    env::split_paths(&env::var_os("PATH")?).find_map(|dir| {
        names
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    })
}

/// Run the normalizer on `input`, writing `output`.
///
/// Every failure, a missing binary or an empty output included, is reported
/// as [`Error::NormalizerUnavailable`].
pub fn normalize(normalizer: &Path, input: &Path, output: &Path) -> Result<()> {
    let args = [
        OsStr::new("--key"),
        OsStr::new(ZERO_KEY),
        input.as_os_str(),
        output.as_os_str(),
    ];

    info!(
        "Executing {} {}",
        normalizer.to_string_lossy().bold(),
        args.iter()
            .map(|x| x.to_string_lossy())
            .map(|x| if x.contains(' ') {
                format!("\"{x}\"")
            } else {
                x.into_owned()
            })
            .collect::<Vec<_>>()
            .join(" ")
    );

    let result = Command::new(normalizer)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::NormalizerUnavailable(format!("{}: {e}", normalizer.display())))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(Error::NormalizerUnavailable(format!(
            "{} exited with code {}: {}",
            normalizer.display(),
            result.status.code().unwrap_or(1),
            stderr.trim()
        )));
    }

    debug!("normalizer output: {}", String::from_utf8_lossy(&result.stdout).trim());

    if fs::metadata(output).map(|x| x.len()).unwrap_or(0) == 0 {
        return Err(Error::NormalizerUnavailable(format!(
            "{} exited successfully without writing {}",
            normalizer.display(),
            output.display()
        )));
    }

    Ok(())
}

/// Turn the muxed file at `temp` into `output`.
///
/// Returns whether the normalizer ran successfully. When it is disabled
/// (empty path), missing or failing, `temp` itself becomes the output.
pub fn finalize(normalizer: &Path, temp: &Path, output: &Path, keep_temp: bool) -> Result<bool> {
    if output.exists() {
        fs::remove_file(output)?;
    }

    let outcome = if normalizer.as_os_str().is_empty() {
        debug!("normalization disabled");
        Err(None)
    } else {
        match normalize(normalizer, temp, output) {
            Ok(()) => Ok(()),
            Err(Error::NormalizerUnavailable(reason)) => Err(Some(reason)),
            Err(e) => return Err(e),
        }
    };

    match outcome {
        Ok(()) => {
            if !keep_temp {
                fs::remove_file(temp)?;
            }
            Ok(true)
        }
        Err(reason) => {
            if let Some(reason) = reason {
                warn!("{reason}, keeping the muxed file as is");
            }

            // a failed run may leave a partial output behind
            if output.exists() {
                fs::remove_file(output)?;
            }

            if keep_temp {
                fs::copy(temp, output)?;
            } else {
                fs::rename(temp, output)?;
            }
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{path::PathBuf, sync::LazyLock};

    static OUTPUT_DIR: LazyLock<PathBuf> = LazyLock::new(|| {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../target/amdecrypt-normalize");
        // start from a clean directory so files left by earlier runs don't leak in
        fs::remove_dir_all(&dir).ok();
        fs::create_dir_all(&dir).ok();
        dir
    });

    #[test]
    fn test_missing_normalizer_falls_back() {
        let temp = OUTPUT_DIR.join("missing.tmp.m4a");
        let output = OUTPUT_DIR.join("missing.m4a");
        fs::write(&temp, b"muxed").unwrap();

        let normalized = finalize(
            Path::new("amdecrypt-no-such-normalizer"),
            &temp,
            &output,
            false,
        )
        .unwrap();

        assert!(!normalized);
        assert!(!temp.exists());
        assert_eq!(fs::read(&output).unwrap(), b"muxed");
    }

    #[test]
    fn test_disabled_normalizer_keeps_temp() {
        let temp = OUTPUT_DIR.join("disabled.tmp.m4a");
        let output = OUTPUT_DIR.join("disabled.m4a");
        fs::write(&temp, b"muxed").unwrap();
        fs::write(&output, b"stale").unwrap();

        assert!(!finalize(Path::new(""), &temp, &output, true).unwrap());
        assert_eq!(fs::read(&temp).unwrap(), b"muxed");
        assert_eq!(fs::read(&output).unwrap(), b"muxed");
    }

    #[test]
    fn test_normalize_reports_missing_binary() {
        let result = normalize(
            Path::new("amdecrypt-no-such-normalizer"),
            Path::new("in.m4a"),
            Path::new("out.m4a"),
        );

        assert!(matches!(result, Err(Error::NormalizerUnavailable(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_normalizer_without_output_falls_back() {
        let temp = OUTPUT_DIR.join("silent.tmp.m4a");
        let output = OUTPUT_DIR.join("silent.m4a");
        fs::write(&temp, b"muxed").unwrap();

        assert!(matches!(
            normalize(Path::new("true"), &temp, &output),
            Err(Error::NormalizerUnavailable(_))
        ));
        assert!(!finalize(Path::new("true"), &temp, &output, false).unwrap());
        assert!(!temp.exists());
        assert_eq!(fs::read(&output).unwrap(), b"muxed");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_paths_reach_the_normalizer() {
        use std::{
            ffi::OsString,
            os::unix::{ffi::OsStringExt, fs::PermissionsExt},
        };

        let name = OsString::from_vec(b"song-\xff.m4a".to_vec());
        let temp = OUTPUT_DIR.join("non-utf8.tmp.m4a");
        let output = OUTPUT_DIR.join(name);
        fs::write(&temp, b"muxed").unwrap();

        // cp treats its last two arguments as source and destination
        let script = OUTPUT_DIR.join("copy-last-two.sh");
        fs::write(&script, "#!/bin/sh\nshift 2\ncp \"$1\" \"$2\"\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(finalize(&script, &temp, &output, false).unwrap());
        assert_eq!(fs::read(&output).unwrap(), b"muxed");
        assert!(!temp.exists());
    }

    #[test]
    fn test_find_executable() {
        assert_eq!(find_executable(Path::new("amdecrypt-no-such-normalizer")), None);
        assert_eq!(find_executable(Path::new("./no/such/file")), None);
    }
}
