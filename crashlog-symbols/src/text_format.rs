//! The textual crash-log serialization.
//!
//! Structural problems (no header, no threads, no `Binary Images:` section,
//! zero or several crashed-thread markers, an unreadable image line) abort
//! the parse with a `MalformedReport` naming the section and line. Per-frame
//! problems (a non-hex address token) only leave that frame unresolved.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use log::warn;
use uuid::Uuid;

use crate::error::Error;
use crate::image::BinaryImage;
use crate::report::{Backtrace, CrashReport, Exception, ProcessInfo, StackFrame, Thread};
use crate::shared::SymbolInfo;

#[derive(Clone, Copy)]
enum Section {
    Header,
    ExceptionBacktrace,
    Thread(usize),
    ThreadState,
    BinaryImages,
}

pub(crate) fn parse(text: &str) -> Result<CrashReport, Error> {
    let mut process_info = ProcessInfo::new();
    let mut exception_type: Option<String> = None;
    let mut blame_info: Option<crate::blame::BlameInfo> = None;
    let mut exception_frames: Vec<StackFrame> = Vec::new();
    let mut threads: Vec<Thread> = Vec::new();
    let mut pending_names: HashMap<u32, String> = HashMap::new();
    let mut register_state: Vec<(String, String)> = Vec::new();
    let mut binary_images: BTreeMap<u64, BinaryImage> = BTreeMap::new();
    let mut saw_binary_images = false;
    let mut section = Section::Header;
    let mut last_line = 0;

    for (index, raw_line) in text.lines().enumerate() {
        let line_number = index + 1;
        last_line = line_number;
        let line = raw_line.trim_end();
        if line.trim().is_empty() {
            continue;
        }

        if line == "Binary Images:" {
            section = Section::BinaryImages;
            saw_binary_images = true;
            continue;
        }
        if line == "Last Exception Backtrace:" {
            section = Section::ExceptionBacktrace;
            continue;
        }
        if line == "Thread State:" || (line.starts_with("Thread ") && line.contains("Thread State"))
        {
            section = Section::ThreadState;
            continue;
        }
        if let Some(marker) = parse_thread_marker(line) {
            match marker {
                ThreadMarker::Name(number, name) => {
                    pending_names.insert(number, name);
                }
                ThreadMarker::Begin(number, crashed) => {
                    threads.push(Thread {
                        number,
                        name: None,
                        crashed,
                        backtrace: Backtrace::default(),
                    });
                    section = Section::Thread(threads.len() - 1);
                }
            }
            continue;
        }

        match section {
            Section::Header => {
                if let Some((key, value)) = line.split_once(':') {
                    let key = key.trim();
                    let value = value.trim().to_string();
                    if key == "Exception Type" {
                        exception_type = Some(value);
                    } else if key == "Blamed" {
                        blame_info = Some(parse_blame_line(&value));
                    } else {
                        process_info.insert(key.to_string(), value);
                    }
                }
            }
            Section::ExceptionBacktrace => {
                if let Some(frame) = parse_frame(line, line_number) {
                    exception_frames.push(frame);
                }
            }
            Section::Thread(index) => {
                if let Some(frame) = parse_frame(line, line_number) {
                    threads[index].backtrace.frames.push(frame);
                }
            }
            Section::ThreadState => {
                parse_register_line(line, &mut register_state);
            }
            Section::BinaryImages => {
                let image = parse_image_line(line, line_number)?;
                if binary_images.insert(image.address, image).is_some() {
                    return Err(Error::malformed(
                        "binary images",
                        line_number,
                        "duplicate image load address",
                    ));
                }
            }
        }
    }

    if process_info.is_empty() {
        return Err(Error::malformed(
            "header",
            1,
            "no process information found",
        ));
    }
    if threads.is_empty() {
        return Err(Error::malformed("threads", last_line, "no thread sections"));
    }
    let crashed_count = threads.iter().filter(|thread| thread.crashed).count();
    if crashed_count != 1 {
        return Err(Error::malformed(
            "threads",
            last_line,
            format!("expected exactly one crashed thread, found {crashed_count}"),
        ));
    }
    if !saw_binary_images {
        return Err(Error::malformed(
            "binary images",
            last_line,
            "missing Binary Images section",
        ));
    }
    let exception = match (exception_type, exception_frames) {
        (Some(exception_type), frames) => Some(Exception {
            exception_type,
            backtrace: Backtrace { frames },
        }),
        (None, frames) if !frames.is_empty() => {
            return Err(Error::malformed(
                "exception",
                last_line,
                "exception backtrace without an Exception Type",
            ));
        }
        (None, _) => None,
    };

    for thread in &mut threads {
        thread.name = pending_names.remove(&thread.number);
    }

    let mut report = CrashReport {
        process_info,
        exception,
        threads,
        register_state,
        binary_images,
        is_property_list: false,
        is_symbolicated: false,
        is_blamed: blame_info.is_some(),
        blame_info,
    };
    finish_parsed_report(&mut report);
    Ok(report)
}

/// Post-parse fixups shared with the property-list codec: owning images for
/// frames that didn't carry a base address, the crashed-process flag, and
/// the symbolicated flag for previously annotated reports.
pub(crate) fn finish_parsed_report(report: &mut CrashReport) {
    let process_path = report.process_info.get("Path").cloned();
    let process_name = report
        .process_info
        .get("Process")
        .map(|value| value.split(" [").next().unwrap_or(value).to_string());
    for image in report.binary_images.values_mut() {
        let path_match = process_path.as_deref() == Some(image.path.as_str());
        let name_match = process_name.as_deref() == Some(image.name());
        image.crashed_process_image = path_match || (process_path.is_none() && name_match);
    }

    let images: Vec<(u64, u64)> = report
        .binary_images
        .values()
        .map(|image| (image.address, image.size))
        .collect();
    let mut any_symbols = false;
    let mut backtraces: Vec<&mut Backtrace> = Vec::new();
    if let Some(exception) = &mut report.exception {
        backtraces.push(&mut exception.backtrace);
    }
    for thread in &mut report.threads {
        backtraces.push(&mut thread.backtrace);
    }
    for backtrace in backtraces {
        for frame in &mut backtrace.frames {
            any_symbols |= frame.symbol_info.is_some();
            if frame.image_address == 0 && frame.address != 0 {
                if let Some(&(address, _)) = images.iter().find(|&&(address, size)| {
                    frame.address >= address && frame.address < address.saturating_add(size)
                }) {
                    frame.image_address = address;
                }
            }
        }
    }
    report.is_symbolicated = any_symbols;
}

fn parse_blame_line(value: &str) -> crate::blame::BlameInfo {
    match value
        .strip_suffix(')')
        .and_then(|v| v.rsplit_once(" (installed "))
    {
        Some((path, date)) => crate::blame::BlameInfo {
            path: path.to_string(),
            install_date: Some(date.to_string()),
        },
        None => crate::blame::BlameInfo {
            path: value.to_string(),
            install_date: None,
        },
    }
}

enum ThreadMarker {
    Name(u32, String),
    Begin(u32, bool),
}

fn parse_thread_marker(line: &str) -> Option<ThreadMarker> {
    let rest = line.strip_prefix("Thread ")?;
    let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
    let number: u32 = rest[..digits_end].parse().ok()?;
    let tail = &rest[digits_end..];
    if let Some(name) = tail.strip_prefix(" name:") {
        return Some(ThreadMarker::Name(number, name.trim().to_string()));
    }
    if tail == " Crashed:" {
        return Some(ThreadMarker::Begin(number, true));
    }
    if tail == ":" {
        return Some(ThreadMarker::Begin(number, false));
    }
    None
}

fn parse_hex(token: &str) -> Option<u64> {
    let digits = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X"))?;
    u64::from_str_radix(digits, 16).ok()
}

fn parse_frame(line: &str, line_number: usize) -> Option<StackFrame> {
    let mut tokens = line.split_whitespace();
    let depth: u32 = tokens.next()?.parse().ok()?;
    let _image_name = tokens.next()?;
    let address_token = tokens.next()?;
    let address = match parse_hex(address_token) {
        Some(address) => address,
        None => {
            // Tolerated: the frame stays unresolved.
            warn!("line {line_number}: unreadable frame address {address_token:?}");
            0
        }
    };
    let rest: Vec<&str> = tokens.collect();

    let mut frame = StackFrame {
        depth,
        address,
        image_address: 0,
        symbol_info: None,
    };
    if rest.len() >= 3 && rest[1] == "+" && rest[0].starts_with("0x") {
        // Unsymbolicated form: "0x<image-base> + <offset>".
        frame.image_address = parse_hex(rest[0]).unwrap_or(0);
    } else if !rest.is_empty() {
        frame.symbol_info = parse_symbol_description(&rest);
    }
    Some(frame)
}

/// Parses a previously symbolicated description:
/// `<symbol> + <offset>` optionally followed by ` (<file>:<line>)`.
fn parse_symbol_description(tokens: &[&str]) -> Option<SymbolInfo> {
    let plus = tokens.iter().rposition(|&token| token == "+")?;
    let offset: u64 = tokens.get(plus + 1)?.parse().ok()?;
    let name = tokens[..plus].join(" ");
    if name.is_empty() {
        return None;
    }
    let (source_path, source_line) = match tokens.get(plus + 2) {
        Some(location) => {
            let inner = location
                .strip_prefix('(')
                .and_then(|s| s.strip_suffix(')'))?;
            let (path, line) = inner.rsplit_once(':')?;
            (Some(path.to_string()), Some(line.parse().ok()?))
        }
        None => (None, None),
    };
    Some(SymbolInfo {
        name: Some(name),
        offset,
        source_path,
        source_line,
    })
}

fn parse_register_line(line: &str, register_state: &mut Vec<(String, String)>) {
    let mut tokens = line.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if let Some(name) = token.strip_suffix(':') {
            if let Some(value) = tokens.next() {
                register_state.push((name.to_string(), value.to_string()));
            }
        }
    }
}

fn parse_image_line(line: &str, line_number: usize) -> Result<BinaryImage, Error> {
    let malformed = |reason: &str| Error::malformed("binary images", line_number, reason);
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 7 || tokens[1] != "-" {
        return Err(malformed("expected '<start> - <end> <name> <arch> <uuid> <path>'"));
    }
    let start = parse_hex(tokens[0]).ok_or_else(|| malformed("unreadable start address"))?;
    let end = parse_hex(tokens[2]).ok_or_else(|| malformed("unreadable end address"))?;
    if end < start {
        return Err(malformed("image end address precedes its start"));
    }
    let architecture = tokens[4].to_string();
    let uuid_token = tokens[5]
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .ok_or_else(|| malformed("uuid must be enclosed in angle brackets"))?;
    let uuid = Uuid::parse_str(uuid_token).map_err(|_| malformed("unreadable uuid"))?;
    let path = tokens[6..].join(" ");
    Ok(BinaryImage::new(
        path,
        start,
        end - start + 1,
        architecture,
        uuid,
    ))
}

pub(crate) fn render(report: &CrashReport) -> String {
    let mut out = String::new();
    for (key, value) in &report.process_info {
        let _ = writeln!(out, "{key}: {value}");
    }
    if let Some(exception) = &report.exception {
        let _ = writeln!(out, "Exception Type: {}", exception.exception_type);
    }
    if let Some(blame_info) = &report.blame_info {
        match &blame_info.install_date {
            Some(date) => {
                let _ = writeln!(out, "Blamed: {} (installed {date})", blame_info.path);
            }
            None => {
                let _ = writeln!(out, "Blamed: {}", blame_info.path);
            }
        }
    }
    let _ = writeln!(out);

    if let Some(exception) = &report.exception {
        if !exception.backtrace.frames.is_empty() {
            let _ = writeln!(out, "Last Exception Backtrace:");
            render_frames(&mut out, &exception.backtrace, &report.binary_images);
            let _ = writeln!(out);
        }
    }

    for thread in &report.threads {
        let number = thread.number;
        if let Some(name) = &thread.name {
            let _ = writeln!(out, "Thread {number} name: {name}");
        }
        if thread.crashed {
            let _ = writeln!(out, "Thread {number} Crashed:");
        } else {
            let _ = writeln!(out, "Thread {number}:");
        }
        render_frames(&mut out, &thread.backtrace, &report.binary_images);
        let _ = writeln!(out);
    }

    if !report.register_state.is_empty() {
        let _ = writeln!(out, "Thread State:");
        for chunk in report.register_state.chunks(4) {
            let row: Vec<String> = chunk
                .iter()
                .map(|(name, value)| format!("{name}: {value}"))
                .collect();
            let _ = writeln!(out, "  {}", row.join("   "));
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "Binary Images:");
    for image in report.binary_images.values() {
        let _ = writeln!(
            out,
            "0x{:x} - 0x{:x} {} {} <{}> {}",
            image.address,
            image.end_address(),
            image.name(),
            image.architecture,
            image.uuid.simple(),
            image.path
        );
    }
    out
}

fn render_frames(out: &mut String, backtrace: &Backtrace, images: &BTreeMap<u64, BinaryImage>) {
    for frame in &backtrace.frames {
        let image_name = images
            .get(&frame.image_address)
            .map(|image| image.name())
            .unwrap_or("???");
        let _ = writeln!(
            out,
            "{:<4}{:<32}0x{:016x} {}",
            frame.depth,
            image_name,
            frame.address,
            frame_description(frame)
        );
    }
}

fn frame_description(frame: &StackFrame) -> String {
    match &frame.symbol_info {
        Some(SymbolInfo {
            name: Some(name),
            offset,
            source_path,
            source_line,
        }) => match (source_path, source_line) {
            (Some(path), Some(line)) => format!("{name} + {offset} ({path}:{line})"),
            _ => format!("{name} + {offset}"),
        },
        Some(SymbolInfo { name: None, offset, .. }) => {
            format!("0x{:x} + {offset}", frame.image_address)
        }
        None if frame.image_address != 0 => format!(
            "0x{:x} + {}",
            frame.image_address,
            frame.address.saturating_sub(frame.image_address)
        ),
        None => format!("0x{:x}", frame.address),
    }
}
