//! Publishing: organize build artifacts, sign, upload to the package index
//! and create the source-control release

use crate::activities::{ActivityContext, ActivityError};
use crate::core::command::CommandDescriptor;
use crate::core::files::walk_files;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const WHEEL_PATTERN: &str = r"^(?P<name>.+)-(?P<version>.+?)-py.+$";

pub const PRODUCTION_INDEX: &str = "https://upload.PyPi.org/legacy/";
pub const TEST_INDEX: &str = "https://test.PyPi.org/legacy/";

const MINISIGN_IMAGE: &str = "jedisct1/minisign";

fn default_stage_dir() -> PathBuf {
    PathBuf::from("stage")
}

fn default_dest_dir() -> PathBuf {
    PathBuf::from("dist")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishOptions {
    /// Directory the build artifacts are gathered in
    #[serde(default = "default_stage_dir")]
    pub stage_dir: PathBuf,

    /// Directory holding the organized, signed files
    #[serde(default = "default_dest_dir")]
    pub dest_dir: PathBuf,

    /// Copy every artifact of the run into the stage directory first
    #[serde(default)]
    pub download_artifacts: bool,

    /// Download the artifacts of a CI run (`gh run download`) first
    #[serde(default)]
    pub ci_run_id: Option<String>,

    /// Environment variable holding the minisign private key
    #[serde(default)]
    pub minisign_key_env: Option<String>,

    /// Environment variable holding the package index token; no upload when unset
    #[serde(default)]
    pub pypi_token_env: Option<String>,

    /// Upload to the production index instead of the test index
    #[serde(default)]
    pub production: bool,

    #[serde(default)]
    pub twine_args: Vec<String>,

    /// Create a release with the organized files as assets
    #[serde(default)]
    pub release: bool,

    /// Release tag; `v<version>` when unset
    #[serde(default)]
    pub tag: Option<String>,

    #[serde(default)]
    pub notes: Option<String>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            stage_dir: default_stage_dir(),
            dest_dir: default_dest_dir(),
            download_artifacts: false,
            ci_run_id: None,
            minisign_key_env: None,
            pypi_token_env: None,
            production: false,
            twine_args: Vec::new(),
            release: false,
            tag: None,
            notes: None,
        }
    }
}

/// Files found in the stage directory, grouped by file name
#[derive(Debug, Clone, PartialEq)]
pub struct OrganizedFiles {
    /// File name -> candidates, smallest first
    pub files: BTreeMap<String, Vec<PathBuf>>,
    pub wheel_name: String,
    pub wheel_version: String,
}

impl OrganizedFiles {
    /// File names present more than once
    pub fn duplicates(&self) -> Vec<&str> {
        self.files
            .iter()
            .filter(|(_, candidates)| candidates.len() > 1)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Group staged files by name and check that all wheels agree on name and version
pub fn organize(stage_dir: &Path) -> Result<OrganizedFiles, ActivityError> {
    let regex = Regex::new(WHEEL_PATTERN).map_err(|e| ActivityError::Invalid(e.to_string()))?;
    let all_files = walk_files(stage_dir, |_| false).map_err(|e| ActivityError::io(stage_dir, e))?;

    let mut files: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    let mut wheel: Option<(String, String)> = None;
    let mut problems = Vec::new();

    for path in all_files {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };

        if name.ends_with(".whl") {
            match regex.captures(&name) {
                None => problems.push(format!(
                    "The wheel filename '{}' is not in the expected format",
                    name
                )),
                Some(captures) => {
                    let this_name = captures["name"].to_string();
                    let this_version = captures["version"].to_string();
                    match &wheel {
                        None => wheel = Some((this_name, this_version)),
                        Some((wheel_name, wheel_version)) => {
                            if &this_name != wheel_name {
                                problems.push(format!(
                                    "The wheel name '{}' in '{}' does not match '{}'",
                                    this_name, name, wheel_name
                                ));
                            }
                            if &this_version != wheel_version {
                                problems.push(format!(
                                    "The wheel version '{}' in '{}' does not match '{}'",
                                    this_version, name, wheel_version
                                ));
                            }
                        }
                    }
                }
            }
        }

        files.entry(name).or_default().push(path);
    }

    if !problems.is_empty() {
        return Err(ActivityError::Invalid(problems.join("\n")));
    }
    let (wheel_name, wheel_version) = wheel.ok_or_else(|| {
        ActivityError::Invalid(format!("No wheels were found in '{}'", stage_dir.display()))
    })?;

    for candidates in files.values_mut() {
        candidates.sort_by_key(|path| std::fs::metadata(path).map(|m| m.len()).unwrap_or(u64::MAX));
    }

    Ok(OrganizedFiles {
        files,
        wheel_name,
        wheel_version,
    })
}

fn sign_command(
    key_file: &Path,
    dest_dir: &Path,
    file_name: &str,
    trusted_comment: &str,
) -> Result<CommandDescriptor, ActivityError> {
    let key_dir = key_file
        .parent()
        .ok_or_else(|| ActivityError::Invalid("Invalid key file location".to_string()))?;
    let key_name = key_file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| ActivityError::Invalid("Invalid key file location".to_string()))?;

    Ok(CommandDescriptor::new("docker")
        .args(["run", "-i", "--rm", "-v"])
        .arg(format!("{}:/host/key", key_dir.display()))
        .arg("-v")
        .arg(format!("{}:/host/content", dest_dir.display()))
        .arg(MINISIGN_IMAGE)
        .arg("-S")
        .arg("-m")
        .arg(format!("/host/content/{}", file_name))
        .arg("-s")
        .arg(format!("/host/key/{}", key_name))
        .arg("-t")
        .arg(trusted_comment)
        .arg("-x")
        .arg(format!("/host/content/{}.minisig", file_name))
        .current_dir(dest_dir))
}

/// Copy the smallest copy of each file into `dest_dir`, signing each one
/// when a key is given, then write `__version__`
async fn copy_and_sign(
    organized: &OrganizedFiles,
    dest_dir: &Path,
    minisign_key: Option<&str>,
    ctx: &ActivityContext<'_>,
) -> Result<(), ActivityError> {
    std::fs::create_dir_all(dest_dir).map_err(|e| ActivityError::io(dest_dir, e))?;

    let key_file = match minisign_key {
        Some(key) => {
            let mut file =
                tempfile::NamedTempFile::new().map_err(|e| ActivityError::io(&std::env::temp_dir(), e))?;
            file.write_all(key.as_bytes())
                .map_err(|e| ActivityError::io(file.path(), e))?;
            Some(file)
        }
        None => None,
    };
    let trusted_comment = format!("{} v{}", organized.wheel_name, organized.wheel_version);

    for (name, candidates) in &organized.files {
        let Some(source) = candidates.first() else {
            continue;
        };
        let dest = dest_dir.join(name);
        std::fs::copy(source, &dest).map_err(|e| ActivityError::io(source, e))?;

        if candidates.len() > 1 {
            info!(
                "Multiple files were found for '{}'; copied the smallest:\n{}",
                name,
                candidates
                    .iter()
                    .enumerate()
                    .map(|(i, c)| format!("    {}) {}", i + 1, c.display()))
                    .collect::<Vec<_>>()
                    .join("\n")
            );
        }

        if let Some(key_file) = &key_file {
            if !name.starts_with('.') {
                let command = sign_command(key_file.path(), dest_dir, name, &trusted_comment)?;
                ctx.exec(&format!("Signing '{}'", name), command).await?;
            }
        }
    }

    let version_file = dest_dir.join("__version__");
    if version_file.exists() {
        return Err(ActivityError::Invalid(format!(
            "The file '{}' already exists",
            version_file.display()
        )));
    }
    std::fs::write(&version_file, &organized.wheel_version)
        .map_err(|e| ActivityError::io(&version_file, e))?;

    Ok(())
}

fn twine_command(
    options: &PublishOptions,
    token: &str,
    wheels: &[PathBuf],
) -> CommandDescriptor {
    let repository = if options.production {
        PRODUCTION_INDEX
    } else {
        TEST_INDEX
    };

    CommandDescriptor::new("twine")
        .arg("upload")
        .arg("--repository-url")
        .arg(repository)
        .args(["--username", "__token__", "--password"])
        .secret_arg(token)
        .args(["--non-interactive", "--disable-progress-bar"])
        .args(options.twine_args.iter().cloned())
        .args(wheels.iter().map(|w| w.display().to_string()))
}

/// Commands that (re)create a release; safe to repeat for the same tag
pub fn release_commands(tag: &str, assets: &[PathBuf], notes: &str) -> Vec<CommandDescriptor> {
    vec![
        CommandDescriptor::new("git").args(["tag", "--force", tag]),
        CommandDescriptor::new("git").args(["push", "--force", "origin", tag]),
        CommandDescriptor::new("gh")
            .args(["release", "delete", tag, "--yes"])
            .allow_failure(),
        CommandDescriptor::new("gh")
            .args(["release", "create", tag])
            .args(assets.iter().map(|a| a.display().to_string()))
            .args(["--title", tag, "--notes", notes]),
    ]
}

pub async fn run(options: &PublishOptions, ctx: &ActivityContext<'_>) -> Result<(), ActivityError> {
    let stage_dir = ctx.resolve(&options.stage_dir);
    let dest_dir = ctx.resolve(&options.dest_dir);

    if options.download_artifacts {
        let store = ctx.artifacts.ok_or_else(|| {
            ActivityError::Invalid("No artifact store is available to download from".to_string())
        })?;
        store.download_all(&stage_dir)?;
    }
    if let Some(run_id) = &options.ci_run_id {
        let command = CommandDescriptor::new("gh")
            .args(["run", "download", run_id.as_str(), "--dir"])
            .arg(stage_dir.display().to_string());
        ctx.exec("Downloading build artifacts", command).await?;
    }
    if !stage_dir.is_dir() {
        return Err(ActivityError::Invalid(format!(
            "The stage directory '{}' does not exist; build and download the artifacts first",
            stage_dir.display()
        )));
    }

    let organized = organize(&stage_dir)?;
    for duplicate in organized.duplicates() {
        warn!("'{}' was staged more than once", duplicate);
    }

    let minisign_key = options
        .minisign_key_env
        .as_deref()
        .map(|name| ctx.secret(name))
        .transpose()?;
    copy_and_sign(&organized, &dest_dir, minisign_key.as_deref(), ctx).await?;

    if let Some(token_env) = &options.pypi_token_env {
        let token = ctx.secret(token_env)?;
        let wheels: Vec<PathBuf> = organized
            .files
            .keys()
            .filter(|name| name.ends_with(".whl"))
            .map(|name| dest_dir.join(name))
            .collect();
        ctx.exec("Publishing package", twine_command(options, &token, &wheels))
            .await?;
    }

    if options.release {
        let tag = options
            .tag
            .clone()
            .unwrap_or_else(|| format!("v{}", organized.wheel_version));
        let notes = options
            .notes
            .clone()
            .unwrap_or_else(|| format!("{} {}", organized.wheel_name, tag));
        let assets = walk_files(&dest_dir, |_| false).map_err(|e| ActivityError::io(&dest_dir, e))?;

        for command in release_commands(&tag, &assets, &notes) {
            ctx.exec("Creating release", command).await?;
        }
        info!("Released {} with {} assets", tag, assets.len());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activities::testing::*;

    fn stage(root: &Path, files: &[(&str, &str)]) {
        for (path, content) in files {
            let path = root.join("stage").join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
    }

    #[test]
    fn test_organize_keeps_smallest_copy() {
        let dir = tempfile::tempdir().unwrap();
        stage(
            dir.path(),
            &[
                ("linux/pkg-1.2.0-py3-none-any.whl", "wheel-larger"),
                ("windows/pkg-1.2.0-py3-none-any.whl", "wheel"),
                ("linux/pkg-1.2.0.tar.gz", "sdist"),
            ],
        );

        let organized = organize(&dir.path().join("stage")).unwrap();
        assert_eq!(organized.wheel_name, "pkg");
        assert_eq!(organized.wheel_version, "1.2.0");
        assert_eq!(organized.duplicates(), vec!["pkg-1.2.0-py3-none-any.whl"]);

        let candidates = &organized.files["pkg-1.2.0-py3-none-any.whl"];
        assert!(candidates[0].to_string_lossy().contains("windows"));
    }

    #[test]
    fn test_organize_rejects_mismatched_wheels() {
        let dir = tempfile::tempdir().unwrap();
        stage(
            dir.path(),
            &[
                ("a/pkg-1.2.0-py3-none-any.whl", ""),
                ("b/pkg-1.3.0-py3-none-any.whl", ""),
            ],
        );

        let err = organize(&dir.path().join("stage")).unwrap_err();
        assert!(err.to_string().contains("version '1.3.0'"));
    }

    #[test]
    fn test_organize_requires_a_wheel() {
        let dir = tempfile::tempdir().unwrap();
        stage(dir.path(), &[("notes.txt", "")]);
        assert!(organize(&dir.path().join("stage")).is_err());
    }

    #[tokio::test]
    async fn test_publish_signs_uploads_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        stage(
            root,
            &[
                ("pkg-2.0.0-py3-none-any.whl", "wheel"),
                (".hidden", "x"),
            ],
        );

        let runner = RecordingRunner::new();
        let ctx = linux_context(&runner, root)
            .with_secret("MINISIGN_KEY", "untrusted comment\nRWR...")
            .with_secret("PYPI_TOKEN", "pypi-secret-token");
        let options = PublishOptions {
            minisign_key_env: Some("MINISIGN_KEY".to_string()),
            pypi_token_env: Some("PYPI_TOKEN".to_string()),
            release: true,
            ..PublishOptions::default()
        };

        run(&options, &ctx).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(root.join("dist/__version__")).unwrap(),
            "2.0.0"
        );

        let commands = runner.commands();
        // .hidden is copied but not signed
        assert_eq!(commands[0].program, "docker");
        assert!(commands[0].args.contains(&"pkg v2.0.0".to_string()));
        assert!(commands[0]
            .args
            .contains(&"/host/content/pkg-2.0.0-py3-none-any.whl.minisig".to_string()));

        assert_eq!(commands[1].program, "twine");
        assert!(commands[1].args.contains(&TEST_INDEX.to_string()));
        assert!(!commands[1].display().contains("pypi-secret-token"));

        let releases: Vec<_> = commands[2..].iter().map(|c| c.display()).collect();
        assert_eq!(releases[0], "git tag --force v2.0.0");
        assert_eq!(releases[1], "git push --force origin v2.0.0");
        assert_eq!(releases[2], "gh release delete v2.0.0 --yes");
        assert!(commands[4].allow_failure);
        assert!(releases[3].starts_with("gh release create v2.0.0"));
        assert!(releases[3].contains("__version__"));
    }

    #[tokio::test]
    async fn test_existing_version_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        stage(root, &[("pkg-1.0.0-py3-none-any.whl", "")]);
        std::fs::create_dir_all(root.join("dist")).unwrap();
        std::fs::write(root.join("dist/__version__"), "0.9.0").unwrap();

        let runner = RecordingRunner::new();
        let ctx = linux_context(&runner, root);

        let err = run(&PublishOptions::default(), &ctx).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_release_commands_are_repeatable() {
        let assets = vec![PathBuf::from("dist/pkg-1.0.0-py3-none-any.whl")];
        let first = release_commands("v1.0.0", &assets, "notes");
        let second = release_commands("v1.0.0", &assets, "notes");
        assert_eq!(first, second);
        assert!(first[0].args.contains(&"--force".to_string()));
        assert!(first[2].allow_failure);
    }
}
