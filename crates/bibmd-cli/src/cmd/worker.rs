//! Hidden `bibmd worker`: one work unit on stdin, one result on stdout

use anyhow::Result;

pub fn run() -> Result<()> {
    bibmd_convert::worker::serve(std::io::stdin().lock(), std::io::stdout().lock())
}
