//! dvs CLI - versioned dataset storage command line interface

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dvs::ops::{diff, fsck, gc, log, stats};
use dvs::types::{
    AnnoFormat, AssetFormat, CopyParams, ExportParams, FilterParams, ImportParams, MergeParams,
    TaskParams, UnknownLabelStrategy,
};
use dvs::{labels, Config, DstRev, Error, Hash, Repo, RevisionGraph, TaskRequest};

#[derive(Parser)]
#[command(name = "dvs")]
#[command(about = "versioned storage for annotated datasets")]
#[command(version)]
struct Cli {
    /// repository path
    #[arg(short, long, env = "DVS_REPO", default_value = ".")]
    repo: PathBuf,

    /// debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// initialize a new repository
    Init {
        /// path to create repository at
        #[arg(default_value = ".")]
        path: PathBuf,

        /// content store directory, possibly shared with other repositories
        #[arg(long)]
        store: Option<PathBuf>,

        /// also commit an empty revision to branch@task_id
        #[arg(long)]
        with_empty_rev: Option<String>,
    },

    /// manage the label registry
    #[command(subcommand)]
    Label(LabelCommand),

    /// import assets and annotations
    Import {
        #[command(flatten)]
        task: TaskArgs,

        /// directory of asset files
        #[arg(long)]
        asset_dir: Option<PathBuf>,

        /// packed asset container
        #[arg(long)]
        pack: Option<PathBuf>,

        /// consolidated index file with metadata and annotations
        #[arg(long)]
        index: Option<PathBuf>,

        /// revision to build on instead of the destination tip
        #[arg(long)]
        base: Option<String>,

        /// unknown class names: ignore, add, stop
        #[arg(long, default_value = "ignore")]
        unknown_labels: UnknownLabelStrategy,
    },

    /// merge revisions; later sources win
    Merge {
        #[command(flatten)]
        task: TaskArgs,

        /// source revisions
        #[arg(short, long = "source", required = true)]
        sources: Vec<String>,

        /// revisions whose assets are left out
        #[arg(short = 'x', long = "exclude")]
        excludes: Vec<String>,
    },

    /// keep assets by class
    Filter {
        #[command(flatten)]
        task: TaskArgs,

        /// source revision
        #[arg(short, long)]
        source: String,

        /// keep assets with any of these classes
        #[arg(short, long = "include")]
        include: Vec<String>,

        /// drop assets with any of these classes
        #[arg(short = 'x', long = "exclude")]
        exclude: Vec<String>,
    },

    /// copy a revision from another repository
    Copy {
        #[command(flatten)]
        task: TaskArgs,

        /// repository to copy from
        #[arg(long)]
        src_repo: PathBuf,

        /// revision in the source repository
        #[arg(short, long)]
        source: String,

        /// drop annotations whose class is unknown here
        #[arg(long)]
        ignore_unknown_labels: bool,
    },

    /// export a revision to directories
    Export {
        /// revision to export
        source: String,

        #[arg(long)]
        asset_dir: Option<PathBuf>,

        #[arg(long)]
        annotation_dir: Option<PathBuf>,

        /// raw or packed
        #[arg(long, default_value = "raw")]
        asset_format: AssetFormat,

        /// none, voc or index
        #[arg(long, default_value = "none")]
        anno_format: AnnoFormat,

        /// only export these classes
        #[arg(short, long = "class")]
        classes: Vec<String>,

        /// asset location prefix recorded in the index
        #[arg(long)]
        media_location: Option<String>,
    },

    /// run a task request from a JSON file and print the result
    Run {
        #[arg(long)]
        request: PathBuf,
    },

    /// show commit log for a revision
    Log {
        revision: String,

        /// maximum number of commits to show
        #[arg(short = 'n', long)]
        max_count: Option<usize>,
    },

    /// show per-asset changes between two revisions
    Diff { from: String, to: String },

    /// print revision statistics as JSON
    Stats { revision: String },

    /// verify repository integrity
    Fsck {
        /// re-hash every asset
        #[arg(long)]
        verify_assets: bool,
    },

    /// remove unreachable commit and partition objects
    Gc {
        /// only show what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// list branches
    Branches,

    /// delete a branch
    DeleteBranch { branch: String },

    /// resolve a revision to a commit hash
    RevParse {
        revision: String,

        /// output short hash (first 12 chars)
        #[arg(long)]
        short: bool,
    },

    /// show a commit object
    CatCommit { commit: String },
}

#[derive(Subcommand)]
enum LabelCommand {
    /// add a class: `name` or `name,alias1,alias2`
    Add { lines: Vec<String> },

    /// list classes
    List,

    /// rename a class; the old name stays as an alias
    Rename { id: u32, name: String },
}

#[derive(Args)]
struct TaskArgs {
    /// destination as branch@task_id
    #[arg(short, long)]
    dst: String,

    /// task message
    #[arg(short, long, default_value = "")]
    message: String,
}

impl TaskArgs {
    fn request(&self, params: TaskParams) -> dvs::Result<TaskRequest> {
        let dst = DstRev::parse(&self.dst)?;
        Ok(TaskRequest::new(dst.task_id, dst.branch, params).with_message(self.message.clone()))
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(e.status_code().as_i32() as u8)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> dvs::Result<ExitCode> {
    match cli.command {
        Commands::Init {
            path,
            store,
            with_empty_rev,
        } => {
            let config = match store {
                Some(store) => Config::with_store(store),
                None => Config::default(),
            };
            let repo = Repo::init_with(&path, config)?;
            println!("initialized dvs repository at {}", path.display());

            if let Some(rev) = with_empty_rev {
                let dst = DstRev::parse(&rev)?;
                let request = TaskRequest::new(dst.task_id, dst.branch, TaskParams::Init)
                    .with_message("empty revision");
                return Ok(finish(dvs::run(&repo, &request)));
            }
        }

        Commands::Label(cmd) => {
            let repo = Repo::open(&cli.repo)?;
            let _lock = repo.lock()?;
            let mut registry = repo.load_labels(false)?;

            match cmd {
                LabelCommand::Add { lines } => {
                    for line in lines {
                        let (name, aliases) = labels::parse_label_line(&line)?;
                        let aliases: Vec<&str> = aliases.iter().map(String::as_str).collect();
                        let id = registry.add(&name, &aliases)?;
                        println!("{} {}", id, name);
                    }
                }
                LabelCommand::List => {
                    for entry in registry.entries() {
                        if entry.aliases.is_empty() {
                            println!("{} {}", entry.id, entry.name);
                        } else {
                            println!("{} {} ({})", entry.id, entry.name, entry.aliases.join(", "));
                        }
                    }
                }
                LabelCommand::Rename { id, name } => {
                    registry.rename(id, &name)?;
                    println!("{} {}", id, name);
                }
            }
        }

        Commands::Import {
            task,
            asset_dir,
            pack,
            index,
            base,
            unknown_labels,
        } => {
            let params = TaskParams::Import(ImportParams {
                asset_dir,
                pack,
                index_file: index,
                base,
                unknown_labels,
            });
            return submit(&cli.repo, task.request(params)?);
        }

        Commands::Merge {
            task,
            sources,
            excludes,
        } => {
            let params = TaskParams::Merge(MergeParams { sources, excludes });
            return submit(&cli.repo, task.request(params)?);
        }

        Commands::Filter {
            task,
            source,
            include,
            exclude,
        } => {
            let params = TaskParams::Filter(FilterParams {
                source,
                include_classes: include,
                exclude_classes: exclude,
            });
            return submit(&cli.repo, task.request(params)?);
        }

        Commands::Copy {
            task,
            src_repo,
            source,
            ignore_unknown_labels,
        } => {
            let params = TaskParams::Copy(CopyParams {
                src_repo,
                source,
                ignore_unknown_labels,
            });
            return submit(&cli.repo, task.request(params)?);
        }

        Commands::Export {
            source,
            asset_dir,
            annotation_dir,
            asset_format,
            anno_format,
            classes,
            media_location,
        } => {
            let params = TaskParams::Export(ExportParams {
                source,
                asset_dir,
                annotation_dir,
                media_location,
                asset_format,
                anno_format,
                class_filter: classes,
            });
            return submit(&cli.repo, TaskRequest::new("export", "", params));
        }

        Commands::Run { request } => {
            let content = std::fs::read(&request).map_err(|e| Error::Io {
                path: request.clone(),
                source: e,
            })?;
            let request: TaskRequest = serde_json::from_slice(&content)?;
            let repo = Repo::open(&cli.repo)?;
            let result = dvs::run(&repo, &request);
            println!("{}", serde_json::to_string(&result)?);
            return Ok(ExitCode::from(result.code.as_i32() as u8));
        }

        Commands::Log {
            revision,
            max_count,
        } => {
            let repo = Repo::open(&cli.repo)?;
            for entry in log(&repo, &revision, max_count)? {
                println!("{}", entry);
            }
        }

        Commands::Diff { from, to } => {
            let repo = Repo::open(&cli.repo)?;
            for change in diff(&repo, &from, &to)? {
                println!("{}", change);
            }
        }

        Commands::Stats { revision } => {
            let repo = Repo::open(&cli.repo)?;
            let registry = repo.load_labels(false)?;
            let s = stats(&repo, &registry, &revision)?;
            println!("{}", serde_json::to_string_pretty(&s)?);
        }

        Commands::Fsck { verify_assets } => {
            let repo = Repo::open(&cli.repo)?;
            let registry = repo.load_labels(false)?;
            let report = fsck(&repo, &registry, verify_assets)?;

            println!("commits checked: {}", report.commits_checked);
            println!("assets checked: {}", report.assets_checked);

            if !report.issues.is_empty() {
                println!("\nissues:");
                for issue in &report.issues {
                    println!("  {}", issue);
                }
            }

            if !report.dangling_objects.is_empty() {
                println!("\ndangling objects: {}", report.dangling_objects.len());
            }

            if report.is_ok() {
                println!("\nrepository is healthy");
            } else {
                println!("\nrepository has issues");
                return Ok(ExitCode::from(dvs::StatusCode::CorruptHistory.as_i32() as u8));
            }
        }

        Commands::Gc { dry_run } => {
            let repo = Repo::open(&cli.repo)?;
            let _lock = repo.lock()?;
            let stats = gc(&repo, dry_run)?;

            let action = if dry_run { "would remove" } else { "removed" };
            println!(
                "{} {} commits, {} partitions",
                action, stats.commits_removed, stats.partitions_removed
            );
            println!("freed {} bytes", stats.bytes_freed);
        }

        Commands::Branches => {
            let repo = Repo::open(&cli.repo)?;
            for branch in dvs::list_branches(&repo)? {
                let hash = dvs::read_branch(&repo, &branch)?;
                println!("{} {}", hash, branch);
            }
        }

        Commands::DeleteBranch { branch } => {
            let repo = Repo::open(&cli.repo)?;
            let _lock = repo.lock()?;
            dvs::delete_branch(&repo, &branch)?;
            println!("deleted branch {}", branch);
        }

        Commands::RevParse { revision, short } => {
            let repo = Repo::open(&cli.repo)?;
            let hash = RevisionGraph::new(&repo).resolve(&revision)?;
            if short {
                println!("{}", hash.short());
            } else {
                println!("{}", hash);
            }
        }

        Commands::CatCommit { commit } => {
            let repo = Repo::open(&cli.repo)?;
            let graph = RevisionGraph::new(&repo);
            let hash = if Hash::looks_like_hex(&commit) {
                Hash::from_hex(&commit)?
            } else {
                graph.resolve(&commit)?
            };
            let commit = graph.read_commit(&hash)?;

            for parent in &commit.parents {
                println!("parent {}", parent);
            }
            for (kind, partition) in &commit.partitions {
                println!("{} {}", kind, partition);
            }
            println!("task {}", commit.task_id);
            println!("author {}", commit.author);
            println!("timestamp {}", commit.timestamp);
            println!();
            println!("{}", commit.message);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// run a task request against the repository at `path`
fn submit(path: &std::path::Path, request: TaskRequest) -> dvs::Result<ExitCode> {
    let repo = Repo::open(path)?;
    Ok(finish(dvs::run(&repo, &request)))
}

fn finish(result: dvs::TaskResult) -> ExitCode {
    match result.commit {
        Some(hash) if result.is_ok() => println!("{}", hash),
        _ if result.is_ok() => {}
        _ => eprintln!("error: {}", result.message),
    }
    ExitCode::from(result.code.as_i32() as u8)
}
