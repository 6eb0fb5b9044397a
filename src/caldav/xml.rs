//! WebDAV XML request bodies and multistatus response parsing.
//!
//! Bodies are emitted with the quick-xml writer; multistatus responses are
//! consumed with the streaming reader matched on local names, since servers
//! vary their namespace prefixes freely.

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Cursor;

use crate::error::CalDavError;

/// One `<response>` block of a PROPFIND multistatus.
#[derive(Debug, Clone, Default)]
pub struct CalendarProps {
    pub href: String,
    pub display_name: Option<String>,
    pub color: Option<String>,
    pub timezone: Option<String>,
    pub is_calendar: bool,
}

/// One `<response>` block of a calendar REPORT: href plus iCalendar body.
#[derive(Debug, Clone, Default)]
pub struct CalendarResource {
    pub href: String,
    pub calendar_data: String,
}

const CALDAV_TIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// PROPFIND body requesting the discovery properties.
pub fn propfind_calendars_body() -> Result<String, CalDavError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    write_decl(&mut writer)?;

    let mut propfind = BytesStart::new("d:propfind");
    propfind.push_attribute(("xmlns:d", "DAV:"));
    propfind.push_attribute(("xmlns:c", "urn:ietf:params:xml:ns:caldav"));
    propfind.push_attribute(("xmlns:a", "http://apple.com/ns/ical/"));
    write_start(&mut writer, propfind)?;

    write_start(&mut writer, BytesStart::new("d:prop"))?;
    for name in [
        "d:resourcetype",
        "d:displayname",
        "a:calendar-color",
        "c:calendar-timezone",
    ] {
        write_empty(&mut writer, name)?;
    }
    write_end(&mut writer, "d:prop")?;

    write_end(&mut writer, "d:propfind")?;
    finish(writer)
}

/// REPORT `calendar-query` body with a time-range filter and server-side
/// expansion of recurring events.
pub fn calendar_query_body(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<String, CalDavError> {
    let start_str = start.format(CALDAV_TIME_FORMAT).to_string();
    let end_str = end.format(CALDAV_TIME_FORMAT).to_string();

    let mut writer = Writer::new(Cursor::new(Vec::new()));
    write_decl(&mut writer)?;

    let mut query = BytesStart::new("c:calendar-query");
    query.push_attribute(("xmlns:d", "DAV:"));
    query.push_attribute(("xmlns:c", "urn:ietf:params:xml:ns:caldav"));
    write_start(&mut writer, query)?;

    write_start(&mut writer, BytesStart::new("d:prop"))?;
    write_empty(&mut writer, "d:getetag")?;
    write_start(&mut writer, BytesStart::new("c:calendar-data"))?;
    let mut expand = BytesStart::new("c:expand");
    expand.push_attribute(("start", start_str.as_str()));
    expand.push_attribute(("end", end_str.as_str()));
    writer
        .write_event(Event::Empty(expand))
        .map_err(xml_write_err)?;
    write_end(&mut writer, "c:calendar-data")?;
    write_end(&mut writer, "d:prop")?;

    write_start(&mut writer, BytesStart::new("c:filter"))?;
    let mut vcal_filter = BytesStart::new("c:comp-filter");
    vcal_filter.push_attribute(("name", "VCALENDAR"));
    write_start(&mut writer, vcal_filter)?;
    let mut vevent_filter = BytesStart::new("c:comp-filter");
    vevent_filter.push_attribute(("name", "VEVENT"));
    write_start(&mut writer, vevent_filter)?;
    let mut time_range = BytesStart::new("c:time-range");
    time_range.push_attribute(("start", start_str.as_str()));
    time_range.push_attribute(("end", end_str.as_str()));
    writer
        .write_event(Event::Empty(time_range))
        .map_err(xml_write_err)?;
    write_end(&mut writer, "c:comp-filter")?;
    write_end(&mut writer, "c:comp-filter")?;
    write_end(&mut writer, "c:filter")?;

    write_end(&mut writer, "c:calendar-query")?;
    finish(writer)
}

/// REPORT body locating the resource that carries a given UID.
pub fn uid_query_body(uid: &str) -> Result<String, CalDavError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    write_decl(&mut writer)?;

    let mut query = BytesStart::new("c:calendar-query");
    query.push_attribute(("xmlns:d", "DAV:"));
    query.push_attribute(("xmlns:c", "urn:ietf:params:xml:ns:caldav"));
    write_start(&mut writer, query)?;

    write_start(&mut writer, BytesStart::new("d:prop"))?;
    write_empty(&mut writer, "d:getetag")?;
    write_empty(&mut writer, "c:calendar-data")?;
    write_end(&mut writer, "d:prop")?;

    write_start(&mut writer, BytesStart::new("c:filter"))?;
    let mut vcal_filter = BytesStart::new("c:comp-filter");
    vcal_filter.push_attribute(("name", "VCALENDAR"));
    write_start(&mut writer, vcal_filter)?;
    let mut vevent_filter = BytesStart::new("c:comp-filter");
    vevent_filter.push_attribute(("name", "VEVENT"));
    write_start(&mut writer, vevent_filter)?;
    let mut prop_filter = BytesStart::new("c:prop-filter");
    prop_filter.push_attribute(("name", "UID"));
    write_start(&mut writer, prop_filter)?;
    let mut text_match = BytesStart::new("c:text-match");
    text_match.push_attribute(("collation", "i;octet"));
    write_start(&mut writer, text_match)?;
    writer
        .write_event(Event::Text(BytesText::new(uid)))
        .map_err(xml_write_err)?;
    write_end(&mut writer, "c:text-match")?;
    write_end(&mut writer, "c:prop-filter")?;
    write_end(&mut writer, "c:comp-filter")?;
    write_end(&mut writer, "c:comp-filter")?;
    write_end(&mut writer, "c:filter")?;

    write_end(&mut writer, "c:calendar-query")?;
    finish(writer)
}

/// Parse a PROPFIND multistatus into per-collection properties.
pub fn parse_calendar_multistatus(xml: &str) -> Result<Vec<CalendarProps>, CalDavError> {
    let mut reader = Reader::from_str(xml);

    let mut results = Vec::new();
    let mut current = CalendarProps::default();
    let mut in_response = false;
    let mut text_target: Option<Field> = None;
    let mut in_resourcetype = false;

    #[derive(Clone, Copy)]
    enum Field {
        Href,
        DisplayName,
        Color,
        Timezone,
    }

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match start_name(&e).as_str() {
                "response" => {
                    in_response = true;
                    current = CalendarProps::default();
                }
                "href" if in_response => text_target = Some(Field::Href),
                "displayname" if in_response => text_target = Some(Field::DisplayName),
                "calendar-color" if in_response => text_target = Some(Field::Color),
                "calendar-timezone" if in_response => text_target = Some(Field::Timezone),
                "resourcetype" if in_response => in_resourcetype = true,
                "calendar" if in_resourcetype => current.is_calendar = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if start_name(&e).as_str() == "calendar" && in_resourcetype {
                    current.is_calendar = true;
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(field) = text_target {
                    let text = unescape_xml(std::str::from_utf8(e.as_ref()).unwrap_or(""));
                    if !text.is_empty() {
                        match field {
                            Field::Href => current.href.push_str(&text),
                            Field::DisplayName => append_opt(&mut current.display_name, &text),
                            Field::Color => append_opt(&mut current.color, &text),
                            Field::Timezone => append_opt(&mut current.timezone, &text),
                        }
                    }
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if let Some(field) = text_target
                    && let Some(resolved) = resolve_entity(std::str::from_utf8(&e).unwrap_or(""))
                {
                    match field {
                        Field::Href => current.href.push(resolved),
                        Field::DisplayName => append_opt_char(&mut current.display_name, resolved),
                        Field::Color => append_opt_char(&mut current.color, resolved),
                        Field::Timezone => append_opt_char(&mut current.timezone, resolved),
                    }
                }
            }
            Ok(Event::End(e)) => match end_name(&e).as_str() {
                "response" => {
                    in_response = false;
                    results.push(std::mem::take(&mut current));
                }
                "href" | "displayname" | "calendar-color" | "calendar-timezone" => {
                    text_target = None;
                }
                "resourcetype" => in_resourcetype = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(CalDavError::Protocol(format!(
                    "multistatus parse error: {e}"
                )));
            }
            _ => {}
        }
    }

    Ok(results)
}

/// Parse a REPORT multistatus into `(href, calendar-data)` pairs.
pub fn parse_calendar_data_multistatus(xml: &str) -> Result<Vec<CalendarResource>, CalDavError> {
    let mut reader = Reader::from_str(xml);

    let mut results = Vec::new();
    let mut current = CalendarResource::default();
    let mut in_response = false;
    let mut in_href = false;
    let mut in_calendar_data = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match start_name(&e).as_str() {
                "response" => {
                    in_response = true;
                    current = CalendarResource::default();
                }
                "href" if in_response => in_href = true,
                "calendar-data" if in_response => in_calendar_data = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                let raw = std::str::from_utf8(e.as_ref()).unwrap_or("");
                if in_calendar_data {
                    current.calendar_data.push_str(&unescape_xml(raw));
                } else if in_href {
                    current.href.push_str(unescape_xml(raw).trim());
                }
            }
            Ok(Event::CData(e)) => {
                if in_calendar_data {
                    current
                        .calendar_data
                        .push_str(std::str::from_utf8(e.as_ref()).unwrap_or(""));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if let Some(resolved) = resolve_entity(std::str::from_utf8(&e).unwrap_or("")) {
                    if in_calendar_data {
                        current.calendar_data.push(resolved);
                    } else if in_href {
                        current.href.push(resolved);
                    }
                }
            }
            Ok(Event::End(e)) => match end_name(&e).as_str() {
                "response" => {
                    in_response = false;
                    if !current.calendar_data.is_empty() {
                        results.push(std::mem::take(&mut current));
                    }
                }
                "href" => in_href = false,
                "calendar-data" => in_calendar_data = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(CalDavError::Protocol(format!(
                    "multistatus parse error: {e}"
                )));
            }
            _ => {}
        }
    }

    Ok(results)
}

fn start_name(e: &BytesStart<'_>) -> String {
    std::str::from_utf8(e.local_name().as_ref())
        .unwrap_or("")
        .to_string()
}

fn end_name(e: &BytesEnd<'_>) -> String {
    std::str::from_utf8(e.local_name().as_ref())
        .unwrap_or("")
        .to_string()
}

/// Resolve the predefined XML entities when the reader surfaces them as
/// standalone reference events.
fn resolve_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => None,
    }
}

fn append_opt(target: &mut Option<String>, text: &str) {
    match target {
        Some(existing) => existing.push_str(text),
        None => *target = Some(text.to_string()),
    }
}

fn append_opt_char(target: &mut Option<String>, c: char) {
    match target {
        Some(existing) => existing.push(c),
        None => *target = Some(c.to_string()),
    }
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#13;", "\r")
        .replace("&amp;", "&")
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn write_decl(writer: &mut XmlWriter) -> Result<(), CalDavError> {
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(xml_write_err)
}

fn write_start(writer: &mut XmlWriter, start: BytesStart<'_>) -> Result<(), CalDavError> {
    writer.write_event(Event::Start(start)).map_err(xml_write_err)
}

fn write_empty(writer: &mut XmlWriter, name: &str) -> Result<(), CalDavError> {
    writer
        .write_event(Event::Empty(BytesStart::new(name)))
        .map_err(xml_write_err)
}

fn write_end(writer: &mut XmlWriter, name: &str) -> Result<(), CalDavError> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_write_err)
}

fn finish(writer: XmlWriter) -> Result<String, CalDavError> {
    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| CalDavError::Protocol(format!("XML encoding error: {e}")))
}

fn xml_write_err<E: std::fmt::Display>(e: E) -> CalDavError {
    CalDavError::Protocol(format!("XML write error: {e}"))
}
