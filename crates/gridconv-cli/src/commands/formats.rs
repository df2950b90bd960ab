use std::io::{self, Write};

use anyhow::Result;
use gridconv_io::{ReaderKind, WriterKind};
use tabwriter::TabWriter;

pub fn handle() -> Result<()> {
    let mut writer = TabWriter::new(io::stdout());
    writeln!(writer, "ROLE\tNAME\tDESCRIPTION")?;
    for kind in ReaderKind::ALL {
        writeln!(writer, "reader\t{}\t{}", kind.name(), kind.friendly_name())?;
    }
    for kind in WriterKind::ALL {
        writeln!(writer, "writer\t{}\t{}", kind.name(), kind.friendly_name())?;
    }
    writer.flush()?;
    Ok(())
}
