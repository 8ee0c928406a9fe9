use std::io::{self, Write};

use kset_core::Event;

/// One JSON document per line, in the event wire shape.
#[derive(Debug, Default)]
pub struct JsonPrinter;

impl crate::Printer for JsonPrinter {
    fn event(&mut self, ev: &Event, out: &mut dyn Write) -> io::Result<()> {
        serde_json::to_writer(&mut *out, ev).map_err(io::Error::from)?;
        out.write_all(b"\n")
    }
}
