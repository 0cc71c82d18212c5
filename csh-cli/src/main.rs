use clap::Parser;
use libcsh::Args;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    libcsh::run(args)
}
