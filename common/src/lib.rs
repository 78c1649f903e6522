//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

mod collections;
mod ids;
mod time;

use std::io::Write;

pub use collections::*;
pub use ids::*;
pub use time::*;

/// Log line format shared by the binaries, passed to `env_logger::Builder::format`.
pub fn format_log_line(
    buf: &mut env_logger::fmt::Formatter,
    record: &log::Record,
) -> std::io::Result<()> {
    writeln!(
        buf,
        "{} {:<5} {}:{} {}",
        buf.timestamp_millis(),
        record.level(),
        record.module_path().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.args()
    )
}
