//! Command-line construction for the steganography tool.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::runner::Invocation;

/// Builds invocations of the external encode/decode tool and knows where
/// it leaves its side files.
///
/// File arguments are names relative to `cwd`; the tool mis-parses long
/// absolute paths, so callers always run it from the artifact's directory.
pub trait StegoTool: Send + Sync {
    /// Hide the contents of `message` inside `cover`, writing `output`.
    fn encode(
        &self,
        cwd: &Path,
        message: &str,
        passphrase: Option<&str>,
        cover: &str,
        output: &str,
    ) -> Invocation;

    /// Extract hidden data from `cover`.
    fn decode(&self, cwd: &Path, passphrase: Option<&str>, cover: &str) -> Invocation;

    /// Where decode writes the recovered text for `cover`.
    fn decoded_text_path(&self, cover: &Path) -> PathBuf {
        with_suffix(cover, ".txt")
    }

    /// Every file a decode of `cover` may leave behind.
    fn decode_byproducts(&self, cover: &Path) -> Vec<PathBuf> {
        vec![self.decoded_text_path(cover), with_suffix(cover, ".pcm")]
    }
}

/// MP3Stego `Encode` / `Decode` binaries.
#[derive(Debug, Clone)]
pub struct Mp3StegoTool {
    encode_bin: PathBuf,
    decode_bin: PathBuf,
}

impl Mp3StegoTool {
    pub fn new(encode_bin: PathBuf, decode_bin: PathBuf) -> Self {
        Self {
            encode_bin,
            decode_bin,
        }
    }
}

impl StegoTool for Mp3StegoTool {
    fn encode(
        &self,
        cwd: &Path,
        message: &str,
        passphrase: Option<&str>,
        cover: &str,
        output: &str,
    ) -> Invocation {
        let mut inv = Invocation::new(&self.encode_bin, cwd).arg("-E").arg(message);
        if let Some(secret) = passphrase {
            inv = inv.arg("-P").arg(secret);
        }
        inv.arg(cover).arg(output)
    }

    fn decode(&self, cwd: &Path, passphrase: Option<&str>, cover: &str) -> Invocation {
        let mut inv = Invocation::new(&self.decode_bin, cwd).arg("-X");
        if let Some(secret) = passphrase {
            inv = inv.arg("-P").arg(secret);
        }
        inv.arg(cover)
    }
}

/// `path` with `suffix` appended to its full file name (`a.mp3` → `a.mp3.txt`).
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Test double that runs `/bin/sh` scripts in place of the real binaries.
///
/// Encode scripts see `$1=message $2=passphrase $3=cover $4=output`;
/// decode scripts see `$1=passphrase $2=cover`. Missing passphrases are
/// passed as empty strings.
#[cfg(test)]
pub(crate) struct ScriptedTool {
    pub encode_script: String,
    pub decode_script: String,
}

#[cfg(test)]
impl ScriptedTool {
    pub fn decoding(script: &str) -> Self {
        Self {
            encode_script: "exit 1".into(),
            decode_script: script.into(),
        }
    }

    pub fn encoding(script: &str) -> Self {
        Self {
            encode_script: script.into(),
            decode_script: "exit 1".into(),
        }
    }
}

#[cfg(test)]
impl StegoTool for ScriptedTool {
    fn encode(
        &self,
        cwd: &Path,
        message: &str,
        passphrase: Option<&str>,
        cover: &str,
        output: &str,
    ) -> Invocation {
        Invocation::new("/bin/sh", cwd)
            .arg("-c")
            .arg(&self.encode_script)
            .arg("sh")
            .arg(message)
            .arg(passphrase.unwrap_or_default())
            .arg(cover)
            .arg(output)
    }

    fn decode(&self, cwd: &Path, passphrase: Option<&str>, cover: &str) -> Invocation {
        Invocation::new("/bin/sh", cwd)
            .arg("-c")
            .arg(&self.decode_script)
            .arg("sh")
            .arg(passphrase.unwrap_or_default())
            .arg(cover)
    }
}
