//! NZB serialization
//!
//! [`NzbSink`] is the call contract used by the uploader:
//! `write_header`, then per file `write_file_header`, any number of
//! `save_segment` calls and `write_file_footer`, and finally `write_footer`.
//! [`NzbWriter`] implements it over any [`Write`].

use quick_xml::escape::escape;
use std::io::Write;

use crate::error::UlNzbError;

type Result<T> = std::result::Result<T, UlNzbError>;

pub trait NzbSink {
    fn write_header(&mut self) -> Result<()>;
    fn write_file_header(&mut self, from: &str, subject: &str, groups: &[String]) -> Result<()>;
    fn save_segment(&mut self, bytes: u64, number: u32, message_id: &str) -> Result<()>;
    fn write_file_footer(&mut self) -> Result<()>;
    fn write_footer(&mut self) -> Result<()>;
}

pub struct NzbWriter<W: Write> {
    out: W,
    name: Option<String>,
    date: i64,
    in_segments: bool,
}

impl<W: Write> NzbWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            name: None,
            date: chrono::Utc::now().timestamp(),
            in_segments: false,
        }
    }

    /// Emit `<meta type="name">` in the head
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Fix the `date` attribute instead of using the current time
    pub fn with_date(mut self, unix_seconds: i64) -> Self {
        self.date = unix_seconds;
        self
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> NzbSink for NzbWriter<W> {
    fn write_header(&mut self) -> Result<()> {
        writeln!(self.out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
        writeln!(
            self.out,
            r#"<!DOCTYPE nzb PUBLIC "-//newzBin//DTD NZB 1.1//EN" "http://www.newzbin.com/DTD/nzb/nzb-1.1.dtd">"#
        )?;
        writeln!(self.out, r#"<nzb xmlns="http://www.newzbin.com/DTD/2003/nzb">"#)?;
        if let Some(name) = &self.name {
            writeln!(self.out, "  <head>")?;
            writeln!(self.out, r#"    <meta type="name">{}</meta>"#, escape(name.as_str()))?;
            writeln!(self.out, "  </head>")?;
        }
        Ok(())
    }

    fn write_file_header(&mut self, from: &str, subject: &str, groups: &[String]) -> Result<()> {
        writeln!(
            self.out,
            r#"  <file poster="{}" date="{}" subject="{}">"#,
            escape(from),
            self.date,
            escape(subject)
        )?;
        writeln!(self.out, "    <groups>")?;
        for group in groups {
            writeln!(self.out, "      <group>{}</group>", escape(group.as_str()))?;
        }
        writeln!(self.out, "    </groups>")?;
        writeln!(self.out, "    <segments>")?;
        self.in_segments = true;
        Ok(())
    }

    fn save_segment(&mut self, bytes: u64, number: u32, message_id: &str) -> Result<()> {
        writeln!(
            self.out,
            r#"      <segment bytes="{}" number="{}">{}</segment>"#,
            bytes,
            number,
            escape(message_id)
        )?;
        Ok(())
    }

    fn write_file_footer(&mut self) -> Result<()> {
        if self.in_segments {
            writeln!(self.out, "    </segments>")?;
            self.in_segments = false;
        }
        writeln!(self.out, "  </file>")?;
        Ok(())
    }

    fn write_footer(&mut self) -> Result<()> {
        writeln!(self.out, "</nzb>")?;
        self.out.flush()?;
        Ok(())
    }
}
