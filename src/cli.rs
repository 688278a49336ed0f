use std::path::PathBuf;

use clap::Parser;

/// Generate files from templates using the state of running containers.
#[derive(Debug, Parser)]
#[command(name = "docker-gen", version)]
pub struct Cli {
    /// Watch for container changes
    #[arg(long)]
    pub watch: bool,

    /// Only include containers with exposed ports
    #[arg(long)]
    pub only_exposed: bool,

    /// Only include containers with published ports
    #[arg(long)]
    pub only_published: bool,

    /// Run command after template is regenerated
    #[arg(long, value_name = "CMD")]
    pub notify: Option<String>,

    /// Config file with template directives
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Container runtime endpoint (unix:// or tcp://)
    #[arg(long, env = "DOCKER_GEN_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Template to render when no config file is given
    pub template: Option<PathBuf>,

    /// Destination file; standard output when omitted
    pub dest: Option<PathBuf>,
}
