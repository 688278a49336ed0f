//! Rendering a template onto its destination file.
//!
//! The destination is only ever replaced by renaming a fully written
//! temporary file from the same directory over it, so readers (and a
//! process killed mid-write) see either the old or the new content.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{fchown, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use log::{error, info};
use tempfile::NamedTempFile;
use tokio::process::Command;

use crate::config::TemplateConfig;
use crate::template::{self, TemplateError};
use crate::types::ContainerRecord;

const TEMP_PREFIX: &str = ".docker-gen";

/// Mode for a destination that did not exist before.
const NEW_FILE_MODE: u32 = 0o644;

#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("unable to create temp file in {dir}: {source}")]
    TempFile {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to write temp file for {dest}: {source}")]
    Write {
        dest: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to chmod temp file for {dest}: {source}")]
    Chmod {
        dest: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to chown temp file for {dest}: {source}")]
    Chown {
        dest: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to compare current file contents: {dest}: {source}")]
    Compare {
        dest: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to create dest file {dest}: {source}")]
    Rename {
        dest: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to write to stdout: {0}")]
    Stdout(#[source] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("error running notify command: {command}, {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("error running notify command: {command}, {status}")]
    Failed {
        command: String,
        status: ExitStatus,
        output: String,
    },
}

/// Render `config` against `containers`, write it if it changed, and run
/// the notify command when it did.  Returns whether the output changed.
pub async fn materialize(
    config: &TemplateConfig,
    containers: &[ContainerRecord],
) -> Result<bool, MaterializeError> {
    let changed = generate_file(config, containers)?;

    if changed {
        if let Some(command) = config.notify_command() {
            if let Err(e) = notify(command).await {
                error!("{}", e);
                if let NotifyError::Failed { output, .. } = &e {
                    if !output.is_empty() {
                        error!("{}", output.trim_end());
                    }
                }
            }
        }
    }
    Ok(changed)
}

/// The containers a template gets to see under `config`'s filters.
pub fn select_containers(
    config: &TemplateConfig,
    containers: &[ContainerRecord],
) -> Vec<ContainerRecord> {
    containers
        .iter()
        .filter(|c| {
            if config.only_published {
                c.is_published()
            } else if config.only_exposed {
                c.is_exposed()
            } else {
                true
            }
        })
        .cloned()
        .collect()
}

pub fn generate_file(
    config: &TemplateConfig,
    containers: &[ContainerRecord],
) -> Result<bool, MaterializeError> {
    let selected = select_containers(config, containers);
    let rendered = template::render_file(&config.template, &selected)?;

    let Some(dest) = config.destination() else {
        let mut stdout = io::stdout().lock();
        stdout
            .write_all(rendered.as_bytes())
            .and_then(|()| stdout.flush())
            .map_err(MaterializeError::Stdout)?;
        return Ok(true);
    };

    let changed = StagedFile::stage(dest, rendered.as_bytes())?.commit()?;
    if changed {
        info!("Generated '{}' from {} containers", dest.display(), selected.len());
    }
    Ok(changed)
}

/// Rendered content sitting in a temp file next to its destination.
pub struct StagedFile {
    tmp: NamedTempFile,
    dest: PathBuf,
    changed: bool,
}

impl StagedFile {
    /// Write `contents` to a temp file beside `dest`, copying the mode and
    /// ownership of an existing destination, and compare the two.  A new
    /// destination gets [`NEW_FILE_MODE`].
    pub fn stage(dest: &Path, contents: &[u8]) -> Result<Self, MaterializeError> {
        let dir = match dest.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(dir)
            .map_err(|source| MaterializeError::TempFile {
                dir: dir.to_path_buf(),
                source,
            })?;

        let dest_err = |source| MaterializeError::Write {
            dest: dest.to_path_buf(),
            source,
        };
        tmp.write_all(contents).map_err(dest_err)?;
        tmp.as_file().sync_all().map_err(dest_err)?;

        let current = match fs::metadata(dest) {
            Ok(meta) => {
                tmp.as_file()
                    .set_permissions(meta.permissions())
                    .map_err(|source| MaterializeError::Chmod {
                        dest: dest.to_path_buf(),
                        source,
                    })?;
                fchown(tmp.as_file(), Some(meta.uid()), Some(meta.gid())).map_err(|source| {
                    MaterializeError::Chown {
                        dest: dest.to_path_buf(),
                        source,
                    }
                })?;
                Some(fs::read(dest).map_err(|source| MaterializeError::Compare {
                    dest: dest.to_path_buf(),
                    source,
                })?)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tmp.as_file()
                    .set_permissions(fs::Permissions::from_mode(NEW_FILE_MODE))
                    .map_err(|source| MaterializeError::Chmod {
                        dest: dest.to_path_buf(),
                        source,
                    })?;
                None
            }
            Err(source) => {
                return Err(MaterializeError::Compare {
                    dest: dest.to_path_buf(),
                    source,
                })
            }
        };

        Ok(Self {
            tmp,
            dest: dest.to_path_buf(),
            changed: current.as_deref() != Some(contents),
        })
    }

    /// Move the temp file over the destination if the content changed;
    /// otherwise discard it.
    pub fn commit(self) -> Result<bool, MaterializeError> {
        if !self.changed {
            return Ok(false);
        }
        self.tmp
            .persist(&self.dest)
            .map_err(|e| MaterializeError::Rename {
                dest: self.dest.clone(),
                source: e.error,
            })?;
        Ok(true)
    }
}

/// Run `command`, split on whitespace, and wait for it.
pub async fn notify(command: &str) -> Result<(), NotifyError> {
    let mut args = command.split_whitespace();
    let Some(program) = args.next() else {
        return Ok(());
    };

    info!("Running notify command: {}", command);
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|source| NotifyError::Spawn {
            command: command.to_string(),
            source,
        })?;

    if output.status.success() {
        return Ok(());
    }
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    Err(NotifyError::Failed {
        command: command.to_string(),
        status: output.status,
        output: combined,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::types::Address;

    fn record(id: &str, ports: &[(&str, &str)]) -> ContainerRecord {
        ContainerRecord {
            id: id.into(),
            name: id.into(),
            image: id.into(),
            addresses: ports
                .iter()
                .map(|(port, host_port)| Address {
                    ip: "172.17.0.2".into(),
                    port: port.to_string(),
                    proto: "tcp".into(),
                    host_ip: String::new(),
                    host_port: host_port.to_string(),
                })
                .collect(),
            env: BTreeMap::new(),
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        config: TemplateConfig,
    }

    impl Fixture {
        fn new(template: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let template_path = dir.path().join("test.tmpl");
            fs::write(&template_path, template).unwrap();
            let config = TemplateConfig {
                template: template_path,
                dest: dir.path().join("out.conf").to_string_lossy().into_owned(),
                ..Default::default()
            };
            Self { dir, config }
        }

        fn dest(&self) -> PathBuf {
            self.dir.path().join("out.conf")
        }

        fn leftover_temp_files(&self) -> usize {
            fs::read_dir(self.dir.path())
                .unwrap()
                .filter(|e| {
                    e.as_ref()
                        .unwrap()
                        .file_name()
                        .to_string_lossy()
                        .starts_with(TEMP_PREFIX)
                })
                .count()
        }
    }

    const IDS: &str = "{% for c in containers %}{{ c.id }}\n{% endfor %}";

    #[test]
    fn second_render_reports_unchanged() {
        let fx = Fixture::new(IDS);
        let containers = [record("web", &[])];

        assert!(generate_file(&fx.config, &containers).unwrap());
        let first = fs::read(fx.dest()).unwrap();
        assert!(!generate_file(&fx.config, &containers).unwrap());
        assert_eq!(fs::read(fx.dest()).unwrap(), first);
        assert_eq!(fs::read_to_string(fx.dest()).unwrap(), "web\n");
        assert_eq!(fx.leftover_temp_files(), 0);
    }

    #[test]
    fn changed_content_replaces_destination() {
        let fx = Fixture::new(IDS);
        fs::write(fx.dest(), "old\n").unwrap();

        assert!(generate_file(&fx.config, &[record("api", &[])]).unwrap());
        assert_eq!(fs::read_to_string(fx.dest()).unwrap(), "api\n");
    }

    #[test]
    fn mode_and_owner_are_preserved() {
        let fx = Fixture::new(IDS);
        fs::write(fx.dest(), "old\n").unwrap();
        fs::set_permissions(fx.dest(), fs::Permissions::from_mode(0o640)).unwrap();
        let before = fs::metadata(fx.dest()).unwrap();

        assert!(generate_file(&fx.config, &[record("api", &[])]).unwrap());
        let after = fs::metadata(fx.dest()).unwrap();
        assert_eq!(after.permissions().mode() & 0o7777, 0o640);
        assert_eq!((after.uid(), after.gid()), (before.uid(), before.gid()));
        assert_ne!(after.ino(), before.ino());
    }

    #[test]
    fn new_destination_is_world_readable() {
        let fx = Fixture::new(IDS);

        assert!(generate_file(&fx.config, &[record("api", &[])]).unwrap());
        let mode = fs::metadata(fx.dest()).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, NEW_FILE_MODE);
    }

    #[test]
    fn abandoned_stage_leaves_destination_intact() {
        let fx = Fixture::new(IDS);
        fs::write(fx.dest(), "old complete content\n").unwrap();

        let staged = StagedFile::stage(&fx.dest(), b"new content\n").unwrap();
        assert!(staged.changed);
        drop(staged);

        assert_eq!(fs::read_to_string(fx.dest()).unwrap(), "old complete content\n");
        assert_eq!(fx.leftover_temp_files(), 0);
    }

    #[test]
    fn render_errors_leave_destination_intact() {
        let fx = Fixture::new("{{ 5|first }}");
        fs::write(fx.dest(), "old\n").unwrap();

        let err = generate_file(&fx.config, &[]).unwrap_err();
        assert!(matches!(err, MaterializeError::Template(_)));
        assert_eq!(fs::read_to_string(fx.dest()).unwrap(), "old\n");
    }

    #[test]
    fn missing_destination_directory_is_fatal() {
        let fx = Fixture::new(IDS);
        let config = TemplateConfig {
            dest: fx.dir.path().join("missing/out.conf").to_string_lossy().into_owned(),
            ..fx.config.clone()
        };
        let err = generate_file(&config, &[]).unwrap_err();
        assert!(matches!(err, MaterializeError::TempFile { .. }));
    }

    #[test]
    fn only_exposed_hides_containers_without_ports() {
        let fx = Fixture::new(IDS);
        let config = TemplateConfig {
            only_exposed: true,
            ..fx.config.clone()
        };
        let containers = [record("web", &[]), record("api", &[("8080", "")])];

        assert!(generate_file(&config, &containers).unwrap());
        assert_eq!(fs::read_to_string(fx.dest()).unwrap(), "api\n");
    }

    #[test]
    fn only_published_requires_a_host_port() {
        let config = TemplateConfig {
            only_published: true,
            only_exposed: true,
            ..Default::default()
        };
        let containers = [
            record("web", &[]),
            record("api", &[("8080", "")]),
            record("edge", &[("80", "8080")]),
        ];
        let selected = select_containers(&config, &containers);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "edge");
    }

    #[tokio::test]
    async fn notify_runs_only_on_change() {
        let fx = Fixture::new(IDS);
        let marker = fx.dir.path().join("notified");
        let config = TemplateConfig {
            notify_cmd: format!("touch {}", marker.display()),
            ..fx.config.clone()
        };
        let containers = [record("web", &[])];

        assert!(materialize(&config, &containers).await.unwrap());
        assert!(marker.exists());

        fs::remove_file(&marker).unwrap();
        assert!(!materialize(&config, &containers).await.unwrap());
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn notify_failures_are_reported() {
        assert!(notify("true").await.is_ok());
        assert!(notify("   ").await.is_ok());
        assert!(matches!(
            notify("false").await,
            Err(NotifyError::Failed { .. })
        ));
        assert!(matches!(
            notify("definitely-not-a-real-command-4242").await,
            Err(NotifyError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn failing_notify_is_not_fatal() {
        let fx = Fixture::new(IDS);
        let config = TemplateConfig {
            notify_cmd: "false".into(),
            ..fx.config.clone()
        };
        assert!(materialize(&config, &[]).await.unwrap());
    }
}
