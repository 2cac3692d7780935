//! The structured (property-list) crash-report serialization.
//!
//! Accepts XML or binary plists on input; always emits XML. The dictionary
//! schema mirrors the text format field for field, so the two forms are
//! interchangeable.

use std::collections::BTreeMap;
use std::io::Cursor;

use plist::{Dictionary, Value};
use uuid::Uuid;

use crate::blame::BlameInfo;
use crate::error::Error;
use crate::image::BinaryImage;
use crate::report::{Backtrace, CrashReport, Exception, ProcessInfo, StackFrame, Thread};
use crate::shared::SymbolInfo;
use crate::text_format::finish_parsed_report;

fn malformed(section: &'static str, reason: impl Into<String>) -> Error {
    Error::malformed(section, 0, reason)
}

fn uint(value: &Value) -> Option<u64> {
    value
        .as_unsigned_integer()
        .or_else(|| value.as_signed_integer().and_then(|n| u64::try_from(n).ok()))
}

pub(crate) fn parse(data: &[u8]) -> Result<CrashReport, Error> {
    let value = Value::from_reader(Cursor::new(data))?;
    let root = value
        .as_dictionary()
        .ok_or_else(|| malformed("root", "top-level value is not a dictionary"))?;

    let mut process_info = ProcessInfo::new();
    let info_dict = root
        .get("process_info")
        .and_then(Value::as_dictionary)
        .ok_or_else(|| malformed("header", "missing process_info dictionary"))?;
    for (key, value) in info_dict.iter() {
        let value = value
            .as_string()
            .ok_or_else(|| malformed("header", format!("process_info entry {key:?} is not a string")))?;
        process_info.insert(key.clone(), value.to_string());
    }
    if process_info.is_empty() {
        return Err(malformed("header", "process_info is empty"));
    }

    let exception = match root.get("exception").and_then(Value::as_dictionary) {
        Some(dict) => {
            let exception_type = dict
                .get("type")
                .and_then(Value::as_string)
                .ok_or_else(|| malformed("exception", "exception has no type"))?
                .to_string();
            Some(Exception {
                exception_type,
                backtrace: parse_frames(dict.get("frames"))?,
            })
        }
        None => None,
    };

    let threads_value = root
        .get("threads")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("threads", "missing threads array"))?;
    let mut threads = Vec::with_capacity(threads_value.len());
    for (position, entry) in threads_value.iter().enumerate() {
        let dict = entry
            .as_dictionary()
            .ok_or_else(|| malformed("threads", "thread entry is not a dictionary"))?;
        threads.push(Thread {
            number: dict
                .get("number")
                .and_then(uint)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(position as u32),
            name: dict
                .get("name")
                .and_then(Value::as_string)
                .map(str::to_string),
            crashed: dict
                .get("crashed")
                .and_then(Value::as_boolean)
                .unwrap_or(false),
            backtrace: parse_frames(dict.get("frames"))?,
        });
    }
    if threads.is_empty() {
        return Err(malformed("threads", "no threads"));
    }
    let crashed_count = threads.iter().filter(|thread| thread.crashed).count();
    if crashed_count != 1 {
        return Err(malformed(
            "threads",
            format!("expected exactly one crashed thread, found {crashed_count}"),
        ));
    }

    let mut register_state = Vec::new();
    if let Some(registers) = root.get("register_state").and_then(Value::as_array) {
        for entry in registers {
            let dict = entry
                .as_dictionary()
                .ok_or_else(|| malformed("registers", "register entry is not a dictionary"))?;
            let name = dict.get("name").and_then(Value::as_string);
            let value = dict.get("value").and_then(Value::as_string);
            if let (Some(name), Some(value)) = (name, value) {
                register_state.push((name.to_string(), value.to_string()));
            }
        }
    }

    let images_dict = root
        .get("binary_images")
        .and_then(Value::as_dictionary)
        .ok_or_else(|| malformed("binary images", "missing binary_images dictionary"))?;
    let mut binary_images = BTreeMap::new();
    for (key, entry) in images_dict.iter() {
        let address: u64 = key
            .parse()
            .map_err(|_| malformed("binary images", format!("bad load address key {key:?}")))?;
        let dict = entry
            .as_dictionary()
            .ok_or_else(|| malformed("binary images", "image entry is not a dictionary"))?;
        let path = dict
            .get("path")
            .and_then(Value::as_string)
            .ok_or_else(|| malformed("binary images", "image has no path"))?
            .to_string();
        let size = dict
            .get("size")
            .and_then(uint)
            .ok_or_else(|| malformed("binary images", "image has no size"))?;
        let architecture = dict
            .get("architecture")
            .and_then(Value::as_string)
            .unwrap_or("unknown")
            .to_string();
        let uuid = dict
            .get("uuid")
            .and_then(Value::as_string)
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or(Uuid::nil());
        let mut image = BinaryImage::new(path, address, size, architecture, uuid);
        image.blamable = dict
            .get("blamable")
            .and_then(Value::as_boolean)
            .unwrap_or(false);
        binary_images.insert(address, image);
    }

    let blame_info = root
        .get("blame")
        .and_then(Value::as_dictionary)
        .and_then(|dict| {
            Some(BlameInfo {
                path: dict.get("path").and_then(Value::as_string)?.to_string(),
                install_date: dict
                    .get("install_date")
                    .and_then(Value::as_string)
                    .map(str::to_string),
            })
        });

    let mut report = CrashReport {
        process_info,
        exception,
        threads,
        register_state,
        binary_images,
        is_property_list: true,
        is_symbolicated: false,
        is_blamed: root
            .get("blamed")
            .and_then(Value::as_boolean)
            .unwrap_or(false),
        blame_info,
    };
    finish_parsed_report(&mut report);
    if let Some(true) = root.get("symbolicated").and_then(Value::as_boolean) {
        report.is_symbolicated = true;
    }
    Ok(report)
}

fn parse_frames(value: Option<&Value>) -> Result<Backtrace, Error> {
    let mut frames = Vec::new();
    let Some(array) = value.and_then(Value::as_array) else {
        return Ok(Backtrace::default());
    };
    for entry in array {
        let dict = entry
            .as_dictionary()
            .ok_or_else(|| malformed("frames", "frame entry is not a dictionary"))?;
        let symbol_info = dict.get("symbol").and_then(Value::as_dictionary).map(|s| {
            SymbolInfo {
                name: dict_string(s, "name"),
                offset: s.get("offset").and_then(uint).unwrap_or(0),
                source_path: dict_string(s, "source_path"),
                source_line: s
                    .get("source_line")
                    .and_then(uint)
                    .and_then(|n| u32::try_from(n).ok()),
            }
        });
        frames.push(StackFrame {
            depth: dict
                .get("depth")
                .and_then(uint)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(frames.len() as u32),
            // A missing or unreadable address is tolerated per frame.
            address: dict.get("address").and_then(uint).unwrap_or(0),
            image_address: dict.get("image_address").and_then(uint).unwrap_or(0),
            symbol_info,
        });
    }
    Ok(Backtrace { frames })
}

fn dict_string(dict: &Dictionary, key: &str) -> Option<String> {
    dict.get(key).and_then(Value::as_string).map(str::to_string)
}

pub(crate) fn render(report: &CrashReport) -> Result<String, Error> {
    let mut root = Dictionary::new();

    let mut info = Dictionary::new();
    for (key, value) in &report.process_info {
        info.insert(key.clone(), Value::String(value.clone()));
    }
    root.insert("process_info".to_string(), Value::Dictionary(info));

    if let Some(exception) = &report.exception {
        let mut dict = Dictionary::new();
        dict.insert(
            "type".to_string(),
            Value::String(exception.exception_type.clone()),
        );
        dict.insert("frames".to_string(), render_frames(&exception.backtrace));
        root.insert("exception".to_string(), Value::Dictionary(dict));
    }

    let threads: Vec<Value> = report
        .threads
        .iter()
        .map(|thread| {
            let mut dict = Dictionary::new();
            dict.insert("number".to_string(), Value::Integer(thread.number.into()));
            if let Some(name) = &thread.name {
                dict.insert("name".to_string(), Value::String(name.clone()));
            }
            dict.insert("crashed".to_string(), Value::Boolean(thread.crashed));
            dict.insert("frames".to_string(), render_frames(&thread.backtrace));
            Value::Dictionary(dict)
        })
        .collect();
    root.insert("threads".to_string(), Value::Array(threads));

    if !report.register_state.is_empty() {
        let registers: Vec<Value> = report
            .register_state
            .iter()
            .map(|(name, value)| {
                let mut dict = Dictionary::new();
                dict.insert("name".to_string(), Value::String(name.clone()));
                dict.insert("value".to_string(), Value::String(value.clone()));
                Value::Dictionary(dict)
            })
            .collect();
        root.insert("register_state".to_string(), Value::Array(registers));
    }

    let mut images = Dictionary::new();
    for image in report.binary_images.values() {
        let mut dict = Dictionary::new();
        dict.insert("path".to_string(), Value::String(image.path.clone()));
        dict.insert("size".to_string(), Value::Integer(image.size.into()));
        dict.insert(
            "architecture".to_string(),
            Value::String(image.architecture.clone()),
        );
        dict.insert(
            "uuid".to_string(),
            Value::String(image.uuid.simple().to_string()),
        );
        if image.blamable {
            dict.insert("blamable".to_string(), Value::Boolean(true));
        }
        images.insert(image.address.to_string(), Value::Dictionary(dict));
    }
    root.insert("binary_images".to_string(), Value::Dictionary(images));

    if report.is_symbolicated {
        root.insert("symbolicated".to_string(), Value::Boolean(true));
    }
    if report.is_blamed {
        root.insert("blamed".to_string(), Value::Boolean(true));
    }
    if let Some(blame_info) = &report.blame_info {
        let mut dict = Dictionary::new();
        dict.insert("path".to_string(), Value::String(blame_info.path.clone()));
        if let Some(date) = &blame_info.install_date {
            dict.insert("install_date".to_string(), Value::String(date.clone()));
        }
        root.insert("blame".to_string(), Value::Dictionary(dict));
    }

    let mut buffer = Vec::new();
    Value::Dictionary(root).to_writer_xml(&mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn render_frames(backtrace: &Backtrace) -> Value {
    let frames: Vec<Value> = backtrace
        .frames
        .iter()
        .map(|frame| {
            let mut dict = Dictionary::new();
            dict.insert("depth".to_string(), Value::Integer(frame.depth.into()));
            dict.insert("address".to_string(), Value::Integer(frame.address.into()));
            dict.insert(
                "image_address".to_string(),
                Value::Integer(frame.image_address.into()),
            );
            if let Some(info) = &frame.symbol_info {
                let mut symbol = Dictionary::new();
                if let Some(name) = &info.name {
                    symbol.insert("name".to_string(), Value::String(name.clone()));
                }
                symbol.insert("offset".to_string(), Value::Integer(info.offset.into()));
                if let Some(path) = &info.source_path {
                    symbol.insert("source_path".to_string(), Value::String(path.clone()));
                }
                if let Some(line) = info.source_line {
                    symbol.insert("source_line".to_string(), Value::Integer(line.into()));
                }
                dict.insert("symbol".to_string(), Value::Dictionary(symbol));
            }
            Value::Dictionary(dict)
        })
        .collect();
    Value::Array(frames)
}
