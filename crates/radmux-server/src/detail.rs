//! Per-client detail files: timestamped attribute dumps appended under
//! the detail directory, one subdirectory per log name.

use chrono::Utc;
use radmux_proto::{dict, Packet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

pub struct DetailWriter {
    dir: PathBuf,
}

impl DetailWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DetailWriter { dir: dir.into() }
    }

    /// Append one record. Write failures are logged and swallowed;
    /// detail logging never takes the daemon down.
    pub fn write(&self, name: &str, packet: &Packet) {
        if let Err(e) = self.try_write(name, packet) {
            warn!(name, error = %e, "failed to write detail record");
        }
    }

    fn try_write(&self, name: &str, packet: &Packet) -> std::io::Result<()> {
        let dir = self.dir.join(name);
        fs::create_dir_all(&dir)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("detail"))?;

        let mut record = String::new();
        record.push_str(&Utc::now().format("%a %b %e %H:%M:%S %Y").to_string());
        record.push('\n');
        for avp in &packet.vps {
            record.push_str(&format!(
                "\t{} = {}\n",
                dict::attr_name(avp.attribute),
                avp.value
            ));
        }
        record.push('\n');

        file.write_all(record.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radmux_proto::{code, Avp, Value};

    #[test]
    fn test_detail_record_appended() {
        let dir = std::env::temp_dir().join(format!("radmux-detail-{}", std::process::id()));
        let writer = DetailWriter::new(&dir);

        let mut packet = Packet::new(code::ACCOUNTING_REQUEST, 1);
        packet.add(Avp::string(dict::USER_NAME, "alice"));
        packet.add(Avp::new(dict::ACCT_STATUS_TYPE, Value::Integer(1)));

        writer.write("detail-test", &packet);
        writer.write("detail-test", &packet);

        let contents = fs::read_to_string(dir.join("detail-test").join("detail")).unwrap();
        assert_eq!(contents.matches("User-Name = \"alice\"").count(), 2);
        assert!(contents.contains("Acct-Status-Type = 1"));

        fs::remove_dir_all(&dir).ok();
    }
}
