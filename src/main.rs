//! strata CLI - git-like version control on OverlayFS

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use strata::{
    CancelToken, Commit, CommitInfo, Error, Manager, ManagerOptions, Workspace, HEAD_REF,
};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "git-like version control on OverlayFS mounts")]
#[command(version)]
struct Cli {
    /// data storage root
    #[arg(long, global = true, default_value = "/var/lib/strata")]
    data_root: PathBuf,

    /// log verbosity: 0 = warnings, 1 = info, 2 = debug
    #[arg(long, global = true, default_value_t = 0)]
    verbose: u8,

    /// change to this directory first
    #[arg(long, global = true)]
    chdir: Option<PathBuf>,

    /// owner uid for mount points and symlinks, defaults to the current user
    #[arg(long, global = true)]
    uid: Option<u32>,

    /// owner gid for mount points and symlinks, defaults to the current group
    #[arg(long, global = true)]
    gid: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// create an empty space and link a workspace at the given directory
    Init {
        /// target directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// clone an existing workspace into a new directory
    Clone {
        /// source workspace path
        source: PathBuf,

        /// target directory
        #[arg(default_value = ".")]
        target: PathBuf,
    },

    /// record changes to the space
    Commit {
        /// commit message
        #[arg(short, long)]
        message: String,
    },

    /// switch the working tree to another revision
    Checkout {
        /// revision to check out
        rev: String,
    },

    /// list, create, or delete branches
    Branch {
        /// branch name, then optionally the revision to branch from
        args: Vec<String>,

        /// list branches
        #[arg(short = 'l', long)]
        list: bool,

        /// delete the named branches
        #[arg(short = 'd', long)]
        delete: bool,

        /// act on global branches
        #[arg(short = 'r', long)]
        remotes: bool,

        /// list local and global branches
        #[arg(short = 'a', long)]
        all: bool,

        /// replace an existing branch
        #[arg(short = 'f', long)]
        force: bool,

        /// print the current branch name
        #[arg(long)]
        show_current: bool,
    },

    /// list, create, or delete tags
    Tag {
        /// tag name, then optionally the revision to tag
        args: Vec<String>,

        /// list tags
        #[arg(short = 'l', long)]
        list: bool,

        /// delete the named tags
        #[arg(short = 'd', long)]
        delete: bool,

        /// replace an existing tag
        #[arg(short = 'f', long)]
        force: bool,
    },

    /// show commit logs
    Log {
        /// revision to start from
        #[arg(default_value = HEAD_REF)]
        rev: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> strata::Result<()> {
    if let Some(dir) = &cli.chdir {
        std::env::set_current_dir(dir).map_err(|source| Error::Io {
            path: dir.clone(),
            source,
        })?;
    }

    let mut manager = Manager::new(ManagerOptions {
        data_root: cli.data_root.clone(),
        chown_uid: cli.uid.unwrap_or_else(|| nix::unistd::getuid().as_raw()),
        chown_gid: cli.gid.unwrap_or_else(|| nix::unistd::getgid().as_raw()),
        initial_branch: strata::DEFAULT_BRANCH.to_string(),
    })?;
    manager.prepare()?;

    let cancel = CancelToken::new();

    match cli.command {
        Commands::Init { path } => {
            ensure_clear_target(&path)?;
            let ws = manager.create_workspace(&path)?;
            ws.expand(&cancel)?;
            println!("initialized workspace at {}", path.display());
        }

        Commands::Clone { source, target } => {
            ensure_clear_target(&target)?;
            let source_ws = manager.get_workspace_from_path(&source)?;
            let ws = manager.clone_workspace(source_ws, &target)?;
            ws.expand(&cancel)?;
            println!("cloned {} to {}", source.display(), target.display());
        }

        Commands::Commit { message } => {
            let ws = manager.get_workspace_from_path(Path::new("."))?;
            let (new_ws, old_mount) = manager.commit(ws, &CommitInfo::new(message))?;
            new_ws.expand(&cancel)?;
            manager.remove_workspace_mount(&old_mount, &cancel)?;
        }

        Commands::Checkout { rev } => {
            let ws = manager.get_workspace_from_path(Path::new("."))?;
            let (new_ws, old_mount) = manager.checkout(ws, &rev)?;
            new_ws.expand(&cancel)?;
            manager.remove_workspace_mount(&old_mount, &cancel)?;
        }

        Commands::Branch {
            args,
            list,
            delete,
            remotes,
            all,
            force,
            show_current,
        } => {
            let mut ws = manager.get_workspace_from_path(Path::new("."))?;

            if show_current {
                println!("{}", ws.branch());
            } else if delete {
                for name in &args {
                    ws.delete_branch(name, remotes)?;
                }
            } else if list || remotes || all || args.is_empty() {
                let branches = if remotes {
                    ws.remote_branches()
                } else if all {
                    ws.all_branches()
                } else {
                    ws.local_branches()
                };
                for branch in branches {
                    println!("{}", branch.local_name());
                }
            } else {
                let rev = args.get(1).map(String::as_str).unwrap_or(HEAD_REF);
                ws.add_branch(&args[0], rev, force)?;
            }
        }

        Commands::Tag {
            args,
            list,
            delete,
            force,
        } => {
            let mut ws = manager.get_workspace_from_path(Path::new("."))?;

            if delete {
                for name in &args {
                    ws.delete_tag(name)?;
                }
            } else if list || args.is_empty() {
                for tag in ws.tags() {
                    println!("{}", tag);
                }
            } else {
                let rev = args.get(1).map(String::as_str).unwrap_or(HEAD_REF);
                ws.add_tag(&args[0], rev, force)?;
            }
        }

        Commands::Log { rev } => {
            let ws = manager.get_workspace_from_path(Path::new("."))?;
            for commit in ws.history(&rev)? {
                print_commit(&ws, &commit);
            }
        }
    }

    Ok(())
}

/// require the target to be absent, an empty directory, or a dead symlink
fn ensure_clear_target(path: &Path) -> strata::Result<()> {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return Ok(());
    };
    if meta.is_dir() {
        let mut entries = fs::read_dir(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if entries.next().is_some() {
            return Err(Error::TargetNotEmpty(path.to_path_buf()));
        }
        return Ok(());
    }
    if meta.is_symlink() && fs::metadata(path).is_err() {
        // dead symlink, safe to replace
        return Ok(());
    }
    Err(Error::TargetNotEmpty(path.to_path_buf()))
}

/// print one commit the way git log does, with colored ref decorations
fn print_commit(ws: &Workspace, commit: &Commit) {
    let mut pointers: Vec<String> = Vec::new();
    for tag in &commit.tags {
        pointers.push(format!("\x1b[33mtag: {}\x1b[0m", tag));
    }
    let current = ws.current_branch().full_name();
    for branch in &commit.branches {
        if branch.full_name() == current {
            pointers.insert(
                0,
                format!("\x1b[34mHEAD -> \x1b[32m{}\x1b[0m", branch.local_name()),
            );
        } else if branch.is_local() {
            pointers.push(format!("\x1b[34m{}\x1b[0m", branch.local_name()));
        } else {
            pointers.push(format!("\x1b[31m{}\x1b[0m", branch.local_name()));
        }
    }

    if pointers.is_empty() {
        println!("\x1b[33mcommit {}\x1b[0m", commit.id.hex());
    } else {
        println!(
            "\x1b[33mcommit {}\x1b[0m ({})",
            commit.id.hex(),
            pointers.join("\x1b[33m, \x1b[0m")
        );
    }
    if let Some(date) = commit.date {
        println!("Date:  {}", date.format("%a %b %e %H:%M:%S %Y %z"));
    }
    if !commit.message.is_empty() {
        println!();
        let trimmed = commit.message.trim_end_matches(['\r', '\n', ' ']);
        println!("    {}", trimmed.replace('\n', "\n    "));
        println!();
    }
}
