use std::fs;
use std::io::Write;

use anyhow::{Context, Result, bail};
use quick_xml::Writer;
use quick_xml::events::{BytesCData, BytesEnd, BytesStart, BytesText, Event};
use serde::Serialize;
use tracing::{debug, info};

use crate::acl::{self, Role};
use crate::category::category;
use crate::config::ExportConfig;
use crate::page::{Page, WikiStore};

pub const FORMAT_VERSION: &str = "1.0";
pub const BATCH_FILE_PREFIX: &str = "findologic";

/// Called after each serialized item with the new running id and the page
/// that was just written.
pub type ProgressObserver<'a> = &'a mut dyn FnMut(usize, &Page);

#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub pages_total: usize,
    pub pages_excluded: usize,
    pub pages_deleted: usize,
    pub pages_retained: usize,
    pub batches_written: usize,
}

/// Serializes the whole store into batch documents: filter excluded and
/// deleted pages, partition the remainder into batches of at most
/// `pages_per_file`, and write one document per batch. Item ids count
/// through the filtered sequence, so they are unique and contiguous across
/// the entire run.
pub fn export_store(
    store: &mut WikiStore,
    roles: &[Role],
    config: &ExportConfig,
    mut observer: Option<ProgressObserver<'_>>,
) -> Result<ExportReport> {
    if config.pages_per_file == 0 {
        bail!("pages_per_file must be at least 1");
    }

    let pages_total = store.len();
    let mut pages_excluded = 0usize;
    let mut pages_deleted = 0usize;
    let mut retained: Vec<String> = Vec::new();
    for (path, page) in &store.pages {
        if config
            .exclude
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            debug!(path = %path, "excluding page by prefix");
            pages_excluded += 1;
            continue;
        }
        if page.deleted {
            debug!(path = %path, "skipping deleted page");
            pages_deleted += 1;
            continue;
        }
        retained.push(path.clone());
    }

    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("failed to create {}", config.output_dir.display()))?;

    let mut batches_written = 0usize;
    for (batch_index, chunk) in retained.chunks(config.pages_per_file).enumerate() {
        let offset = batch_index * config.pages_per_file;
        write_batch(store, roles, config, offset, chunk, &mut observer)?;
        batches_written += 1;
    }

    info!(
        pages = retained.len(),
        batches = batches_written,
        "export complete"
    );
    Ok(ExportReport {
        pages_total,
        pages_excluded,
        pages_deleted,
        pages_retained: retained.len(),
        batches_written,
    })
}

/// Writes one batch document. The whole document is assembled in memory and
/// lands on disk with a single write; a run that dies mid-batch leaves at
/// worst one truncated file to regenerate.
fn write_batch(
    store: &mut WikiStore,
    roles: &[Role],
    config: &ExportConfig,
    offset: usize,
    chunk: &[String],
    observer: &mut Option<ProgressObserver<'_>>,
) -> Result<()> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    let mut root = BytesStart::new("findologic");
    root.push_attribute(("version", FORMAT_VERSION));
    writer.write_event(Event::Start(root))?;

    let start = offset.to_string();
    let count = config.pages_per_file.to_string();
    let total = chunk.len().to_string();
    let mut items = BytesStart::new("items");
    items.push_attribute(("start", start.as_str()));
    items.push_attribute(("count", count.as_str()));
    items.push_attribute(("total", total.as_str()));
    writer.write_event(Event::Start(items))?;

    let mut id = offset;
    for path in chunk {
        let page = store
            .pages
            .get_mut(path)
            .with_context(|| format!("page {path} vanished from the store"))?;
        page.ensure_text()?;
        write_item(&mut writer, page, roles, config, id)?;
        id += 1;
        if let Some(callback) = observer.as_mut() {
            callback(id, page);
        }
        page.purge_text();
    }

    writer.write_event(Event::End(BytesEnd::new("items")))?;
    writer.write_event(Event::End(BytesEnd::new("findologic")))?;

    let mut buffer = writer.into_inner();
    buffer.push(b'\n');
    let file_name = format!("{BATCH_FILE_PREFIX}_{offset}_{}.xml", config.pages_per_file);
    let target = config.output_dir.join(file_name);
    fs::write(&target, buffer)
        .with_context(|| format!("failed to write {}", target.display()))?;
    info!(file = %target.display(), items = chunk.len(), "wrote batch");
    Ok(())
}

fn write_item<W: Write>(
    writer: &mut Writer<W>,
    page: &Page,
    roles: &[Role],
    config: &ExportConfig,
    id: usize,
) -> Result<()> {
    let id_attr = id.to_string();
    let mut item = BytesStart::new("item");
    item.push_attribute(("id", id_attr.as_str()));
    writer.write_event(Event::Start(item))?;

    writer.write_event(Event::Start(BytesStart::new("allOrdernumbers")))?;
    write_single_group(writer, "ordernumbers", "ordernumber", &page.path)?;
    writer.write_event(Event::End(BytesEnd::new("allOrdernumbers")))?;

    write_single_group(writer, "names", "name", page.meta.title.as_deref().unwrap_or(""))?;
    write_single_group(
        writer,
        "summaries",
        "summary",
        page.meta.description.as_deref().unwrap_or(""),
    )?;
    write_single_group(writer, "descriptions", "description", page.text().unwrap_or(""))?;

    // The date group carries the update timestamp and disappears entirely
    // when it is unknown.
    if let Some(updated_at) = page.meta.updated_at.as_deref() {
        write_single_group(writer, "dateAddeds", "dateAdded", updated_at)?;
    }

    let url = format!("{}{}", config.page_url_prefix, page.path);
    write_single_group(writer, "urls", "url", &url)?;

    write_properties(writer, page)?;

    let category_value = category(&page.path, &config.category_delimiter, &config.category_prefix);
    write_attributes(writer, &category_value)?;

    write_usergroups(writer, roles, &page.path)?;

    writer.write_event(Event::Empty(BytesStart::new("allImages")))?;
    writer.write_event(Event::Empty(BytesStart::new("allKeywords")))?;
    writer.write_event(Event::Empty(BytesStart::new("salesFrequencies")))?;
    write_single_group(writer, "prices", "price", "0.0")?;

    writer.write_event(Event::End(BytesEnd::new("item")))?;
    Ok(())
}

/// Flat item properties in fixed order; empty or absent values drop the
/// whole property element.
fn write_properties<W: Write>(writer: &mut Writer<W>, page: &Page) -> Result<()> {
    let mut properties: Vec<(&str, String)> = Vec::new();
    if let Some(creator) = page.meta.creator.as_deref()
        && !creator.is_empty()
    {
        properties.push(("creator", creator.to_string()));
    }
    if let Some(updated_at) = page.meta.updated_at.as_deref() {
        properties.push(("updated_at", updated_at.to_string()));
    }
    if let Some(created_at) = page.meta.created_at.as_deref() {
        properties.push(("created_at", created_at.to_string()));
    }
    if !page.meta.contributors.is_empty() {
        properties.push((
            "contributors",
            serde_json::to_string(&page.meta.contributors)?,
        ));
    }

    writer.write_event(Event::Start(BytesStart::new("allProperties")))?;
    writer.write_event(Event::Start(BytesStart::new("properties")))?;
    for (key, value) in &properties {
        writer.write_event(Event::Start(BytesStart::new("property")))?;
        writer.write_event(Event::Start(BytesStart::new("key")))?;
        write_cdata(writer, key)?;
        writer.write_event(Event::End(BytesEnd::new("key")))?;
        writer.write_event(Event::Start(BytesStart::new("value")))?;
        write_cdata(writer, value)?;
        writer.write_event(Event::End(BytesEnd::new("value")))?;
        writer.write_event(Event::End(BytesEnd::new("property")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("properties")))?;
    writer.write_event(Event::End(BytesEnd::new("allProperties")))?;
    Ok(())
}

fn write_attributes<W: Write>(writer: &mut Writer<W>, category_value: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("allAttributes")))?;
    writer.write_event(Event::Start(BytesStart::new("attributes")))?;
    writer.write_event(Event::Start(BytesStart::new("attribute")))?;
    writer.write_event(Event::Start(BytesStart::new("key")))?;
    write_cdata(writer, "cat")?;
    writer.write_event(Event::End(BytesEnd::new("key")))?;
    writer.write_event(Event::Start(BytesStart::new("values")))?;
    writer.write_event(Event::Start(BytesStart::new("value")))?;
    write_cdata(writer, category_value)?;
    writer.write_event(Event::End(BytesEnd::new("value")))?;
    writer.write_event(Event::End(BytesEnd::new("values")))?;
    writer.write_event(Event::End(BytesEnd::new("attribute")))?;
    writer.write_event(Event::End(BytesEnd::new("attributes")))?;
    writer.write_event(Event::End(BytesEnd::new("allAttributes")))?;
    Ok(())
}

/// A page every role can read gets an empty restriction; otherwise exactly
/// the accessible roles' hashes are listed.
fn write_usergroups<W: Write>(writer: &mut Writer<W>, roles: &[Role], page_path: &str) -> Result<()> {
    match acl::visible_groups(roles, page_path) {
        None => {
            writer.write_event(Event::Empty(BytesStart::new("usergroups")))?;
        }
        Some(hashes) => {
            writer.write_event(Event::Start(BytesStart::new("usergroups")))?;
            for hash in hashes {
                writer.write_event(Event::Start(BytesStart::new("usergroup")))?;
                write_cdata(writer, hash)?;
                writer.write_event(Event::End(BytesEnd::new("usergroup")))?;
            }
            writer.write_event(Event::End(BytesEnd::new("usergroups")))?;
        }
    }
    Ok(())
}

fn write_single_group<W: Write>(
    writer: &mut Writer<W>,
    group: &str,
    element: &str,
    text: &str,
) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(group)))?;
    writer.write_event(Event::Start(BytesStart::new(element)))?;
    write_cdata(writer, text)?;
    writer.write_event(Event::End(BytesEnd::new(element)))?;
    writer.write_event(Event::End(BytesEnd::new(group)))?;
    Ok(())
}

/// Writes text as CDATA. A payload containing `]]>` is split across blocks
/// so a conforming reader recovers it verbatim.
fn write_cdata<W: Write>(writer: &mut Writer<W>, text: &str) -> Result<()> {
    let mut chunks = text.split("]]>").peekable();
    while let Some(chunk) = chunks.next() {
        writer.write_event(Event::CData(BytesCData::new(chunk)))?;
        if chunks.peek().is_some() {
            writer.write_event(Event::Text(BytesText::from_escaped("]]>")))?;
        }
    }
    Ok(())
}
