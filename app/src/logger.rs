use crate::error::{BluetoothDevicesError, DevicesResult};

use humantime::format_rfc3339_seconds;
use std::{path::Path, time::SystemTime};

#[derive(Clone, PartialEq)]
pub enum LoggerType<'a> {
    Console,
    File(&'a Path),
}

pub fn init_logger(log_type: LoggerType, filter: log::LevelFilter) -> DevicesResult<()> {
    let devices_logger = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} [{}] {} - {}",
                format_rfc3339_seconds(SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(filter)
        .level_for("zbus", log::LevelFilter::Warn);

    match log_type {
        LoggerType::Console => devices_logger.chain(std::io::stderr()),
        LoggerType::File(path) => devices_logger.chain(fern::log_file(path)?),
    }
    .apply()
    .map_err(|_| BluetoothDevicesError::LoggerError)
}
