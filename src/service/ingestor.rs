//! NF-e document parsing.
//!
//! Element lookups compare local names only, so documents with or without the
//! `http://www.portalfiscal.inf.br/nfe` namespace (and with or without the
//! `nfeProc` wrapper) parse the same way.

use crate::error::{NfeError, NfeResult};
use crate::models::{InvoiceTotals, ParsedInvoice, ParsedLine};
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, NaiveDate, Utc};
use roxmltree::{Document, Node};
use std::collections::HashSet;
use std::str::FromStr;

const ACCESS_KEY_LEN: usize = 44;
const NO_BARCODE: &str = "SEM GTIN";
/// Decimal places allowed by the NF-e layout for qCom / vUnCom.
const QUANTITY_SCALE: i64 = 4;
const UNIT_PRICE_SCALE: i64 = 10;

/// Parses raw document bytes into a draft. Nothing is persisted here.
pub fn parse_document(payload: &[u8]) -> NfeResult<ParsedInvoice> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| NfeError::MalformedInput(format!("payload is not UTF-8: {}", e)))?;
    let text = text.trim_start_matches('\u{feff}');
    if text.trim().is_empty() {
        return Err(NfeError::MalformedInput("empty payload".to_string()));
    }

    let doc = Document::parse(text)?;
    let inf = doc
        .descendants()
        .find(|n| n.is_element() && n.has_tag_name("infNFe"))
        .ok_or_else(|| NfeError::MalformedInput("missing infNFe envelope".to_string()))?;

    let access_key = parse_access_key(inf.attribute("Id"))?;

    let ide = required_child(inf, "ide")?;
    let number = required_text(ide, "nNF")?;
    let series = required_text(ide, "serie")?;
    let (issued_at, issued_at_fallback) = parse_issued_at(ide);

    let emit = required_child(inf, "emit")?;
    let issuer_tax_id = child_text(emit, "CNPJ")
        .or_else(|| child_text(emit, "CPF"))
        .map(|raw| digits_only(&raw))
        .filter(|d| !d.is_empty())
        .ok_or_else(|| NfeError::MalformedInput("emit: missing CNPJ/CPF".to_string()))?;
    let issuer_name = required_text(emit, "xNome")?;

    let mut lines = Vec::new();
    let mut ordinals = HashSet::new();
    for (idx, det) in inf
        .children()
        .filter(|n| n.is_element() && n.has_tag_name("det"))
        .enumerate()
    {
        let line = parse_line(det, idx)?;
        if !ordinals.insert(line.ordinal) {
            return Err(NfeError::MalformedInput(format!(
                "item {} appears more than once",
                line.ordinal
            )));
        }
        lines.push(line);
    }
    if lines.is_empty() {
        return Err(NfeError::MalformedInput("document has no det items".to_string()));
    }

    let totals = parse_totals(inf)?;

    Ok(ParsedInvoice {
        access_key,
        number,
        series,
        issued_at,
        issued_at_fallback,
        issuer_tax_id,
        issuer_name,
        totals,
        lines,
    })
}

fn parse_access_key(id: Option<&str>) -> NfeResult<String> {
    let id = id.ok_or_else(|| NfeError::MalformedInput("infNFe without Id".to_string()))?;
    let key = id.trim();
    let key = key.strip_prefix("NFe").unwrap_or(key);
    if key.len() != ACCESS_KEY_LEN || !key.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NfeError::MalformedInput(format!(
            "access key must be {} digits, got '{}'",
            ACCESS_KEY_LEN, key
        )));
    }
    Ok(key.to_string())
}

/// dhEmi, then dEmi, then now. The flag reports the last case.
fn parse_issued_at(ide: Node) -> (DateTime<Utc>, bool) {
    if let Some(raw) = child_text(ide, "dhEmi") {
        if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
            return (ts.with_timezone(&Utc), false);
        }
    }
    if let Some(raw) = child_text(ide, "dEmi") {
        if let Some(ts) = NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
        {
            return (ts.and_utc(), false);
        }
    }
    (Utc::now(), true)
}

fn parse_line(det: Node, idx: usize) -> NfeResult<ParsedLine> {
    let ordinal = det
        .attribute("nItem")
        .and_then(|v| v.trim().parse::<i32>().ok())
        .unwrap_or(idx as i32 + 1);
    let ctx = format!("item {}", ordinal);

    let prod = det
        .children()
        .find(|n| n.is_element() && n.has_tag_name("prod"))
        .ok_or_else(|| NfeError::MalformedInput(format!("{}: missing prod", ctx)))?;

    let quantity = required_decimal(prod, "qCom", &ctx)?;
    check_scale(&quantity, "qCom", QUANTITY_SCALE, &ctx)?;
    if quantity <= BigDecimal::zero() {
        return Err(NfeError::MalformedInput(format!(
            "{}: qCom must be positive, got {}",
            ctx, quantity
        )));
    }

    let unit_price = required_decimal(prod, "vUnCom", &ctx)?;
    check_scale(&unit_price, "vUnCom", UNIT_PRICE_SCALE, &ctx)?;

    // trade-unit barcode first, taxable-unit barcode as fallback
    let barcode = child_text(prod, "cEAN")
        .filter(|b| is_barcode(b))
        .or_else(|| child_text(prod, "cEANTrib").filter(|b| is_barcode(b)));

    Ok(ParsedLine {
        ordinal,
        vendor_code: required_text(prod, "cProd").map_err(|e| prefix(e, &ctx))?,
        description: required_text(prod, "xProd").map_err(|e| prefix(e, &ctx))?,
        ncm: child_text(prod, "NCM"),
        cfop: child_text(prod, "CFOP"),
        unit: required_text(prod, "uCom").map_err(|e| prefix(e, &ctx))?,
        quantity,
        unit_price,
        gross_value: required_decimal(prod, "vProd", &ctx)?,
        barcode,
        discount: optional_decimal(prod, "vDesc", &ctx)?,
        freight: optional_decimal(prod, "vFrete", &ctx)?,
        other: optional_decimal(prod, "vOutro", &ctx)?,
    })
}

fn parse_totals(inf: Node) -> NfeResult<InvoiceTotals> {
    let total = required_child(inf, "total")?;
    let tot = required_child(total, "ICMSTot")?;
    let ctx = "ICMSTot";
    let amount = |name: &str| -> NfeResult<BigDecimal> {
        Ok(optional_decimal(tot, name, ctx)?.unwrap_or_else(BigDecimal::zero))
    };

    Ok(InvoiceTotals {
        products: amount("vProd")?,
        discount: amount("vDesc")?,
        freight: amount("vFrete")?,
        other: amount("vOutro")?,
        ipi: amount("vIPI")?,
        icms_st: amount("vST")?,
        invoice: amount("vNF")?,
    })
}

fn is_barcode(value: &str) -> bool {
    !value.is_empty() && !value.eq_ignore_ascii_case(NO_BARCODE)
}

pub fn digits_only(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.is_element() && n.has_tag_name(name))
}

fn required_child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> NfeResult<Node<'a, 'input>> {
    child(node, name).ok_or_else(|| {
        NfeError::MalformedInput(format!(
            "{}: missing {}",
            node.tag_name().name(),
            name
        ))
    })
}

/// Trimmed text of a child element; empty text counts as absent.
fn child_text(node: Node, name: &str) -> Option<String> {
    child(node, name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn required_text(node: Node, name: &str) -> NfeResult<String> {
    child_text(node, name).ok_or_else(|| {
        NfeError::MalformedInput(format!(
            "{}: missing {}",
            node.tag_name().name(),
            name
        ))
    })
}

fn optional_decimal(node: Node, name: &str, ctx: &str) -> NfeResult<Option<BigDecimal>> {
    child_text(node, name)
        .map(|raw| {
            BigDecimal::from_str(&raw).map_err(|_| {
                NfeError::MalformedInput(format!("{}: {} '{}' is not a number", ctx, name, raw))
            })
        })
        .transpose()
}

fn required_decimal(node: Node, name: &str, ctx: &str) -> NfeResult<BigDecimal> {
    optional_decimal(node, name, ctx)?
        .ok_or_else(|| NfeError::MalformedInput(format!("{}: missing {}", ctx, name)))
}

/// Rejects values that would lose digits when stored.
fn check_scale(value: &BigDecimal, name: &str, max_scale: i64, ctx: &str) -> NfeResult<()> {
    if value.with_scale(max_scale) != *value {
        return Err(NfeError::MalformedInput(format!(
            "{}: {} {} has more than {} decimal places",
            ctx, name, value, max_scale
        )));
    }
    Ok(())
}

fn prefix(err: NfeError, ctx: &str) -> NfeError {
    match err {
        NfeError::MalformedInput(msg) => NfeError::MalformedInput(format!("{}: {}", ctx, msg)),
        other => other,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) struct Item<'a> {
        pub n: i32,
        pub code: &'a str,
        pub qty: &'a str,
        pub price: &'a str,
        pub gross: &'a str,
        pub ean: &'a str,
    }

    pub(crate) fn build_xml(key: &str, items: &[Item], totals: &str) -> String {
        let dets: String = items
            .iter()
            .map(|it| {
                format!(
                    r#"<det nItem="{n}"><prod>
                        <cProd>{code}</cProd><cEAN>{ean}</cEAN><xProd>Item {n}</xProd>
                        <NCM>61046200</NCM><CFOP>5102</CFOP><uCom>UN</uCom>
                        <qCom>{qty}</qCom><vUnCom>{price}</vUnCom><vProd>{gross}</vProd>
                        <cEANTrib>{ean}</cEANTrib>
                    </prod></det>"#,
                    n = it.n,
                    code = it.code,
                    ean = it.ean,
                    qty = it.qty,
                    price = it.price,
                    gross = it.gross
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<nfeProc xmlns="http://www.portalfiscal.inf.br/nfe" versao="4.00">
  <NFe>
    <infNFe Id="NFe{key}" versao="4.00">
      <ide><nNF>1001</nNF><serie>1</serie><dhEmi>2025-03-10T10:00:00-03:00</dhEmi></ide>
      <emit><CNPJ>11.111.111/0001-55</CNPJ><xNome>Fornecedor X</xNome></emit>
      {dets}
      <total><ICMSTot>{totals}</ICMSTot></total>
    </infNFe>
  </NFe>
</nfeProc>"#
        )
    }

    const KEY: &str = "12345678901234567890123456789012345678901234";

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn parses_header_lines_and_totals() {
        let xml = build_xml(
            KEY,
            &[
                Item { n: 1, code: "VEN-001", qty: "2", price: "10.00", gross: "20.00", ean: "7891234000019" },
                Item { n: 2, code: "VEN-002", qty: "3", price: "5.00", gross: "15.00", ean: "SEM GTIN" },
            ],
            "<vProd>35.00</vProd><vDesc>1.00</vDesc><vFrete>4.00</vFrete><vNF>38.00</vNF>",
        );
        let inv = parse_document(xml.as_bytes()).unwrap();

        assert_eq!(inv.access_key, KEY);
        assert_eq!(inv.number, "1001");
        assert_eq!(inv.series, "1");
        assert!(!inv.issued_at_fallback);
        assert_eq!(inv.issued_at.to_rfc3339(), "2025-03-10T13:00:00+00:00");
        assert_eq!(inv.issuer_tax_id, "11111111000155");
        assert_eq!(inv.issuer_name, "Fornecedor X");

        assert_eq!(inv.lines.len(), 2);
        let first = &inv.lines[0];
        assert_eq!(first.ordinal, 1);
        assert_eq!(first.vendor_code, "VEN-001");
        assert_eq!(first.quantity, dec("2"));
        assert_eq!(first.gross_value, dec("20.00"));
        assert_eq!(first.barcode.as_deref(), Some("7891234000019"));
        assert_eq!(first.cfop.as_deref(), Some("5102"));
        assert_eq!(inv.lines[1].barcode, None);

        assert_eq!(inv.totals.products, dec("35.00"));
        assert_eq!(inv.totals.discount, dec("1.00"));
        assert_eq!(inv.totals.freight, dec("4.00"));
        assert_eq!(inv.totals.other, BigDecimal::zero());
        assert_eq!(inv.totals.invoice, dec("38.00"));
    }

    #[test]
    fn parses_without_namespace_or_wrapper() {
        let xml = format!(
            r#"<NFe><infNFe Id="NFe{KEY}">
                <ide><nNF>7</nNF><serie>2</serie><dEmi>2024-12-01</dEmi></ide>
                <emit><CPF>123.456.789-09</CPF><xNome>Pessoa</xNome></emit>
                <det nItem="1"><prod><cProd>A</cProd><xProd>A</xProd><uCom>CX</uCom>
                    <qCom>1.000</qCom><vUnCom>9.5</vUnCom><vProd>9.50</vProd><vDesc>0.50</vDesc></prod></det>
                <total><ICMSTot><vProd>9.50</vProd><vNF>9.00</vNF></ICMSTot></total>
            </infNFe></NFe>"#
        );
        let inv = parse_document(xml.as_bytes()).unwrap();
        assert_eq!(inv.issuer_tax_id, "12345678909");
        assert_eq!(inv.issued_at.to_rfc3339(), "2024-12-01T00:00:00+00:00");
        assert_eq!(inv.lines[0].discount, Some(dec("0.50")));
        assert_eq!(inv.lines[0].barcode, None);
    }

    #[test]
    fn taxable_unit_barcode_is_fallback() {
        let xml = build_xml(
            KEY,
            &[Item { n: 1, code: "A", qty: "1", price: "1", gross: "1", ean: "" }],
            "<vNF>1</vNF>",
        )
        .replace("<cEANTrib></cEANTrib>", "<cEANTrib>7890000000000</cEANTrib>");
        let inv = parse_document(xml.as_bytes()).unwrap();
        assert_eq!(inv.lines[0].barcode.as_deref(), Some("7890000000000"));
    }

    #[test]
    fn unparsable_emission_falls_back_to_now() {
        let xml = build_xml(
            KEY,
            &[Item { n: 1, code: "A", qty: "1", price: "1", gross: "1", ean: "" }],
            "<vNF>1</vNF>",
        )
        .replace("2025-03-10T10:00:00-03:00", "ontem");
        let before = Utc::now();
        let inv = parse_document(xml.as_bytes()).unwrap();
        assert!(inv.issued_at_fallback);
        assert!(inv.issued_at >= before);
    }

    #[test]
    fn rejects_missing_envelope() {
        let err = parse_document(b"<nfeProc><NFe/></nfeProc>").unwrap_err();
        assert!(matches!(err, NfeError::MalformedInput(msg) if msg.contains("infNFe")));
    }

    #[test]
    fn rejects_garbage_and_empty_payloads() {
        assert!(matches!(parse_document(b"not xml <"), Err(NfeError::MalformedInput(_))));
        assert!(matches!(parse_document(b"   "), Err(NfeError::MalformedInput(_))));
        assert!(matches!(parse_document(&[0xff, 0xfe, 0x00]), Err(NfeError::MalformedInput(_))));
    }

    #[test]
    fn rejects_short_access_key() {
        let xml = build_xml(
            "123",
            &[Item { n: 1, code: "A", qty: "1", price: "1", gross: "1", ean: "" }],
            "<vNF>1</vNF>",
        );
        let err = parse_document(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, NfeError::MalformedInput(msg) if msg.contains("44")));
    }

    #[test]
    fn rejects_line_missing_required_field() {
        let xml = build_xml(
            KEY,
            &[Item { n: 3, code: "A", qty: "1", price: "1", gross: "1", ean: "" }],
            "<vNF>1</vNF>",
        )
        .replace("<vProd>1</vProd>", "");
        let err = parse_document(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, NfeError::MalformedInput(msg) if msg.contains("item 3") && msg.contains("vProd")));
    }

    #[test]
    fn rejects_non_positive_quantity() {
        let xml = build_xml(
            KEY,
            &[Item { n: 1, code: "A", qty: "0", price: "1", gross: "0", ean: "" }],
            "<vNF>0</vNF>",
        );
        assert!(matches!(parse_document(xml.as_bytes()), Err(NfeError::MalformedInput(_))));
    }

    #[test]
    fn rejects_document_without_items() {
        let xml = build_xml(KEY, &[], "<vNF>0</vNF>");
        let err = parse_document(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, NfeError::MalformedInput(msg) if msg.contains("no det")));
    }

    #[test]
    fn rejects_repeated_item_number() {
        let xml = build_xml(
            KEY,
            &[
                Item { n: 1, code: "A", qty: "1", price: "1.00", gross: "1.00", ean: "" },
                Item { n: 1, code: "B", qty: "1", price: "2.00", gross: "2.00", ean: "" },
            ],
            "<vNF>3.00</vNF>",
        );
        let err = parse_document(xml.as_bytes()).unwrap_err();
        assert!(matches!(err, NfeError::MalformedInput(msg) if msg.contains("item 1 appears more than once")));
    }

    #[test]
    fn keeps_full_precision_of_quantity_and_unit_price() {
        let xml = build_xml(
            KEY,
            &[Item { n: 1, code: "A", qty: "1.0005", price: "9.9999999999", gross: "10.00", ean: "" }],
            "<vNF>10.00</vNF>",
        );
        let inv = parse_document(xml.as_bytes()).unwrap();
        assert_eq!(inv.lines[0].quantity, dec("1.0005"));
        assert_eq!(inv.lines[0].unit_price, dec("9.9999999999"));
    }

    #[test]
    fn rejects_quantity_and_price_beyond_layout_precision() {
        let too_fine_qty = build_xml(
            KEY,
            &[Item { n: 1, code: "A", qty: "1.00051", price: "1.00", gross: "1.00", ean: "" }],
            "<vNF>1.00</vNF>",
        );
        let err = parse_document(too_fine_qty.as_bytes()).unwrap_err();
        assert!(matches!(err, NfeError::MalformedInput(msg) if msg.contains("qCom")));

        let too_fine_price = build_xml(
            KEY,
            &[Item { n: 1, code: "A", qty: "1", price: "1.00000000001", gross: "1.00", ean: "" }],
            "<vNF>1.00</vNF>",
        );
        let err = parse_document(too_fine_price.as_bytes()).unwrap_err();
        assert!(matches!(err, NfeError::MalformedInput(msg) if msg.contains("vUnCom")));

        // trailing zeros beyond the limit are harmless
        let padded = build_xml(
            KEY,
            &[Item { n: 1, code: "A", qty: "2.000000", price: "1.00", gross: "2.00", ean: "" }],
            "<vNF>2.00</vNF>",
        );
        assert!(parse_document(padded.as_bytes()).is_ok());
    }
}
