use memfs::{MemFs, DEFAULT_NODE_LIMIT};

use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use async_std::task;
use libfs::loopback::LoopbackVfs;
use libfs::types::{DevHandle, FsHandle, FsIndex, FsInfo};
use libfs::{LookupFlags, Server};
use structopt::StructOpt;
use tracing::debug;

#[derive(Debug, StructOpt)]
struct Args {
    #[structopt(long, default_value = "1", help = "The device to mount")]
    device: u32,

    #[structopt(long, default_value = "1", help = "The filesystem handle VFS assigns")]
    fs_handle: u32,

    #[structopt(long, help = "The maximum number of nodes [default: 4096]")]
    max_nodes: Option<usize>,

    #[structopt(
        name = "STEP",
        help = "Lookups to run, as [FLAG,...:]PATH with FLAG one of \
                file, dir, excl, create, link=INDEX, unlink, parent"
    )]
    steps: Vec<Step>,
}

/// A lookup to run
#[derive(Debug)]
struct Step {
    flags: LookupFlags,
    index: FsIndex,
    path: String,
}

impl FromStr for Step {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (flag_list, path) = if s.starts_with('/') {
            ("", s)
        } else {
            s.split_once(':')
                .ok_or_else(|| anyhow!("expected [FLAG,...:]PATH, got {:?}", s))?
        };

        let mut flags = LookupFlags::empty();
        let mut index = FsIndex(0);
        for flag in flag_list.split(',').filter(|f| !f.is_empty()) {
            flags |= match flag {
                "file" => LookupFlags::FILE,
                "dir" => LookupFlags::DIRECTORY,
                "excl" => LookupFlags::EXCLUSIVE,
                "create" => LookupFlags::CREATE,
                "unlink" => LookupFlags::UNLINK,
                "parent" => LookupFlags::PARENT,
                _ => {
                    let raw = flag
                        .strip_prefix("link=")
                        .ok_or_else(|| anyhow!("unknown lookup flag {:?}", flag))?;
                    index = FsIndex(raw.parse().context("invalid link index")?);
                    LookupFlags::LINK
                }
            };
        }

        Ok(Self {
            flags,
            index,
            path: path.to_owned(),
        })
    }
}

fn setup_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().pretty().with_writer(std::io::stderr))
        .with(ErrorLayer::default())
        .init();
}

fn main() -> Result<()> {
    setup_tracing();
    let args = Args::from_args();
    task::block_on(run(args))?;
    Ok(())
}

#[allow(clippy::unit_arg)]
#[tracing::instrument(err)]
async fn run(args: Args) -> Result<()> {
    let fs = MemFs::with_node_limit(args.max_nodes.unwrap_or(DEFAULT_NODE_LIMIT));
    let vfs = LoopbackVfs::new(FsHandle(args.fs_handle));

    let server = Server::register(FsInfo::new("memfs")?, fs)
        .initialize(&vfs)
        .await
        .context("failed to register memfs")?;
    debug!(fs_handle = %server.fs_handle(), "registered");
    let server = task::spawn(server.run());

    let dev = DevHandle(args.device);
    let root = vfs.mounted(dev).await?;
    debug!(?root, "mounted");

    for step in &args.steps {
        let ret = vfs.lookup(&step.path, dev, step.flags, step.index).await;
        match ret {
            Ok(reply) => println!("{:?} {} => {:?}", step.flags, step.path, reply),
            Err(errno) => println!("{:?} {} => {}", step.flags, step.path, errno),
        }
    }

    vfs.hang_up();
    server.await?;

    Ok(())
}
