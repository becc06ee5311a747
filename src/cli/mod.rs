//! 命令行接口
//!
//! 参数定义、命令处理与终端输出

pub mod commands;
pub mod render;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::env::constants::{LOCAL_TUNNEL_PORT, VERSION};

/// FloraLab - run Flower federated learning on SLURM clusters
#[derive(Parser, Debug)]
#[command(name = "floralab")]
#[command(about = "Deploy Flower stacks on SLURM clusters through an SSH tunnel", long_about = None)]
#[command(version = VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Add the floralab sections to pyproject.toml
    Init {
        /// SSH destination of the cluster login node (e.g. user@login.hpc.example)
        login_node: String,
        /// Project directory
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
    /// Deploy florago, spin up a Flower stack and run the project on it
    Run {
        /// Number of client nodes
        #[arg(short, long, default_value_t = 2)]
        nodes: u32,
        /// SLURM partition
        #[arg(short, long)]
        partition: Option<String>,
        /// Memory per node (e.g. 4G)
        #[arg(short, long)]
        memory: Option<String>,
        /// Time limit (e.g. 01:00:00)
        #[arg(short, long)]
        time: Option<String>,
        /// Local port of the SSH tunnel
        #[arg(long, default_value_t = LOCAL_TUNNEL_PORT)]
        ssh_port: u16,
        /// Project directory
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
    /// Tear down the Flower stack through a temporary SSH tunnel
    Stop {
        /// Local port of the SSH tunnel
        #[arg(long, default_value_t = LOCAL_TUNNEL_PORT)]
        ssh_port: u16,
        /// Project directory
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
    /// Submit a Flower stack job (1 server + N clients)
    Spin {
        /// Number of client nodes
        num_nodes: u32,
        #[arg(short, long)]
        partition: Option<String>,
        #[arg(short, long)]
        memory: Option<String>,
        #[arg(short, long)]
        time: Option<String>,
        /// Override the florago API URL
        #[arg(long, env = "FLORAGO_API_URL")]
        api_url: Option<String>,
    },
    /// Show the Flower stack status
    Status {
        /// Show ports
        #[arg(short, long)]
        verbose: bool,
        #[arg(long, env = "FLORAGO_API_URL")]
        api_url: Option<String>,
    },
    /// Cancel the Flower stack job
    Down {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
        #[arg(long, env = "FLORAGO_API_URL")]
        api_url: Option<String>,
    },
    /// Show Flower stack and SLURM cluster information
    Monitoring {
        #[arg(long, env = "FLORAGO_API_URL")]
        api_url: Option<String>,
    },
    /// Check the florago API server
    Health {
        #[arg(long, env = "FLORAGO_API_URL")]
        api_url: Option<String>,
    },
}
