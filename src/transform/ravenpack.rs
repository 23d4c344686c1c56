//! RSS2 transform for the ravenpack feed.
//!
//! Renders an accepted content event into the partner's RSS2 XML document
//! and names the file `benzinga_<node>_<updated-unix>_rss2.xml`. Ticker
//! rows are enriched from the reference store; a lookup miss leaves the
//! enrichment attributes empty and never fails the conversion.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::BytesText;
use quick_xml::Writer;
use tracing::error;

use crate::content::Event;
use crate::refstore::InstrumentLookup;
use crate::transform::{
    rewrite_body_ticker_paths, Artifact, ContentClass, Transform, TransformError,
};

const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"utf-8\" ?>\n";
const DC_NAMESPACE: &str = "http://purl.org/dc/elements/1.1/";
const BZ_NAMESPACE: &str = "http://www.benzinga.com/feed-ns-bz/1.0/";

// The trailing offset is a fixed literal of the feed's date layout.
const PUB_DATE_FORMAT: &str = "%a, %d %b %y %H:%M:%S -700";

pub struct Ravenpack<L> {
    lookup: Arc<L>,
}

impl<L: InstrumentLookup> Ravenpack<L> {
    pub fn new(lookup: Arc<L>) -> Self {
        Self { lookup }
    }

    async fn ticker_rows(&self, event: &Event) -> Vec<TickerRow> {
        let mut rows = Vec::with_capacity(event.content.tickers.len());

        for ticker in &event.content.tickers {
            // "EX:SYM" carries an exchange prefix; bare symbols default to USD.
            let parts: Vec<&str> = ticker.name.split(':').collect();
            let lookup = if parts.len() > 1 {
                self.lookup.by_symbol_exchange(parts[1], parts[0]).await
            } else {
                self.lookup.by_symbol_currency(parts[0], "USD").await
            };

            let instrument = match lookup {
                Ok(row) => row,
                Err(e) => {
                    error!(ticker = %ticker.name, error = %e, "Instrument lookup error");
                    None
                }
            };

            let (isin, exchange) = instrument
                .map(|i| (i.isin, i.exchange))
                .unwrap_or_default();

            rows.push(TickerRow {
                name: ticker.name.clone(),
                primary: ticker.primary,
                isin,
                exchange,
            });
        }

        rows
    }
}

#[async_trait]
impl<L: InstrumentLookup> Transform for Ravenpack<L> {
    async fn convert(&self, event: &Event) -> Result<Artifact, TransformError> {
        let tickers = self.ticker_rows(event).await;

        let mut data = XML_HEADER.as_bytes().to_vec();
        data.extend(build_document(event, &tickers)?);

        Ok(Artifact::new(filename(event), data))
    }
}

struct TickerRow {
    name: String,
    primary: bool,
    isin: String,
    exchange: String,
}

fn filename(event: &Event) -> String {
    format!(
        "benzinga_{}_{}_rss2.xml",
        event.content.node_id,
        event.content.updated_at.timestamp()
    )
}

fn base_url(class: Option<ContentClass>, node_id: &str) -> String {
    match class {
        Some(ContentClass::PressRelease) => {
            format!("https://www.benzinga.com/export/feed/ravenpack_pr1/{node_id}.xml")
        }
        Some(ContentClass::Story) => {
            format!("https://www.benzinga.com/export/feed/ravenpack_realtime1/{node_id}.xml")
        }
        None => String::new(),
    }
}

fn categories(event: &Event, class: Option<ContentClass>) -> Vec<(String, String)> {
    let mut cats = Vec::new();

    if class == Some(ContentClass::PressRelease) {
        cats.push((
            "https://www.benzinga.com/press-releases".to_string(),
            "Press Releases".to_string(),
        ));
    } else {
        for channel in &event.content.channels {
            cats.push((
                format!("https://www.benzinga.com/taxonomy/term/{}", channel.id),
                channel.name.clone(),
            ));
        }
        for ticker in &event.content.tickers {
            cats.push(("stock-symbol".to_string(), ticker.name.clone()));
            cats.push((
                format!("https://www.benzinga.com/stock/{}", ticker.name.to_lowercase()),
                ticker.name.clone(),
            ));
        }
    }

    cats.push(("publisher".to_string(), "Benzinga".to_string()));
    cats
}

fn pub_date(t: DateTime<Utc>) -> String {
    t.format(PUB_DATE_FORMAT).to_string()
}

fn flag(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

fn build_document(event: &Event, tickers: &[TickerRow]) -> Result<Vec<u8>, quick_xml::Error> {
    let content = &event.content;
    let node_id = content.node_id.to_string();
    let version_id = content.version_id.to_string();
    let timestamp = pub_date(content.created_at);

    let class = ContentClass::from_type(&content.content_type);
    let class_name = class.map(|c| c.as_str()).unwrap_or_default();

    let author = if content.author.is_empty() {
        "Benzinga"
    } else {
        &content.author
    };

    let first_run = flag(content.content_type.eq_ignore_ascii_case("story") && content.partner_url.is_empty());

    let description = rewrite_body_ticker_paths("https://benzinga.com", &content.body);
    let cats = categories(event, class);

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 1);

    writer
        .create_element("rss")
        .with_attribute(("version", "2.0"))
        .with_attribute(("base", base_url(class, &node_id).as_str()))
        .with_attribute(("dc", DC_NAMESPACE))
        .with_attribute(("bz", BZ_NAMESPACE))
        .write_inner_content(|w| {
            w.create_element("channel").write_inner_content(|w| {
                w.create_element("title")
                    .write_text_content(BytesText::new("Benzinga"))?;
                w.create_element("link").write_text_content(BytesText::new(""))?;
                w.create_element("description")
                    .write_text_content(BytesText::new(""))?;
                w.create_element("language")
                    .write_text_content(BytesText::new("en"))?;

                w.create_element("item").write_inner_content(|w| {
                    w.create_element("title")
                        .write_text_content(BytesText::new(&content.title))?;
                    w.create_element("link").write_text_content(BytesText::new(
                        &format!("https://www.benzinga.com/node/{node_id}"),
                    ))?;
                    w.create_element("description")
                        .write_text_content(BytesText::new(&description))?;
                    w.create_element("pubDate")
                        .write_text_content(BytesText::new(&timestamp))?;
                    w.create_element("dc:creator")
                        .write_text_content(BytesText::new(author))?;
                    w.create_element("guid")
                        .with_attribute(("isPermaLink", "false"))
                        .write_text_content(BytesText::new(&format!(
                            "{node_id} at http://benzinga.com"
                        )))?;

                    for (domain, text) in &cats {
                        w.create_element("category")
                            .with_attribute(("domain", domain.as_str()))
                            .write_text_content(BytesText::new(text))?;
                    }

                    w.create_element("bz:id")
                        .write_text_content(BytesText::new(&node_id))?;
                    w.create_element("bz:revisionid")
                        .write_text_content(BytesText::new(&version_id))?;
                    w.create_element("bz:revisiondate")
                        .write_text_content(BytesText::new(&timestamp))?;
                    w.create_element("bz:type")
                        .with_attribute(("bz", flag(content.is_post)))
                        .with_attribute(("pro", flag(content.is_pro_post)))
                        .with_attribute(("firstrun", first_run))
                        .write_text_content(BytesText::new(class_name))?;

                    for ticker in tickers {
                        w.create_element("bz:ticker")
                            .with_attribute(("primary", flag(ticker.primary)))
                            .with_attribute(("isin", ticker.isin.as_str()))
                            .with_attribute(("exchange", ticker.exchange.as_str()))
                            .with_attribute(("sentiment", "0"))
                            .write_text_content(BytesText::new(&ticker.name))?;
                    }

                    Ok::<(), quick_xml::Error>(())
                })?;

                Ok::<(), quick_xml::Error>(())
            })?;

            Ok::<(), quick_xml::Error>(())
        })?;

    Ok(writer.into_inner())
}
