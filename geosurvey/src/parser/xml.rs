//! Arbre XML minimal construit avec quick-xml
//!
//! Les recherches se font en deux tentatives: nom exact (qualifié ou non),
//! puis nom local, pour tolérer `kml:Placemark` comme `Placemark`.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Élément XML avec ses enfants et son texte direct
#[derive(Debug, Clone, Default)]
pub struct XmlElement {
    /// Nom tel qu'écrit dans le document (avec préfixe éventuel)
    pub name: String,
    /// Nom local (sans préfixe)
    pub local: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    /// Texte direct (texte + CDATA concaténés)
    pub text: String,
}

impl XmlElement {
    fn matches_exact(&self, name: &str) -> bool {
        self.name == name
    }

    fn matches_local(&self, name: &str) -> bool {
        self.local == name
    }

    /// Premier enfant direct portant ce nom
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children
            .iter()
            .find(|c| c.matches_exact(name))
            .or_else(|| self.children.iter().find(|c| c.matches_local(name)))
    }

    /// Enfants directs portant ce nom
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children
            .iter()
            .filter(move |c| c.matches_exact(name) || c.matches_local(name))
    }

    /// Premier descendant (parcours en profondeur) portant ce nom
    pub fn find(&self, name: &str) -> Option<&XmlElement> {
        self.find_by(&|e: &XmlElement| e.matches_exact(name))
            .or_else(|| self.find_by(&|e: &XmlElement| e.matches_local(name)))
    }

    fn find_by(&self, pred: &dyn Fn(&XmlElement) -> bool) -> Option<&XmlElement> {
        for child in &self.children {
            if pred(child) {
                return Some(child);
            }
            if let Some(found) = child.find_by(pred) {
                return Some(found);
            }
        }
        None
    }

    /// Tous les descendants portant ce nom, dans l'ordre du document
    pub fn descendants_named(&self, name: &str) -> Vec<&XmlElement> {
        let mut exact = Vec::new();
        self.collect_by(&|e: &XmlElement| e.matches_exact(name), &mut exact);
        if !exact.is_empty() {
            return exact;
        }

        let mut local = Vec::new();
        self.collect_by(&|e: &XmlElement| e.matches_local(name), &mut local);
        local
    }

    fn collect_by<'a>(&'a self, pred: &dyn Fn(&XmlElement) -> bool, out: &mut Vec<&'a XmlElement>) {
        for child in &self.children {
            if pred(child) {
                out.push(child);
            }
            child.collect_by(pred, out);
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Texte direct, sans espaces de bord
    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }

    /// Texte non vide d'un enfant direct
    pub fn child_text(&self, name: &str) -> Option<String> {
        self.child(name)
            .map(|c| c.trimmed_text().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Texte non vide du premier descendant
    pub fn find_text(&self, name: &str) -> Option<String> {
        self.find(name)
            .map(|c| c.trimmed_text().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// Parse un document complet; toute erreur de structure est retournée en texte
pub fn parse_document(content: &str) -> Result<XmlElement, String> {
    let mut reader = Reader::from_str(content);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(element_from(&e)?),
            Ok(Event::Empty(e)) => {
                let element = element_from(&e)?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| "unexpected closing tag".to_string())?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(t)) => {
                if let Some(top) = stack.last_mut() {
                    // Les entités HTML (&nbsp;...) ne sont pas des entités XML: texte brut
                    match t.unescape() {
                        Ok(text) => top.text.push_str(&text),
                        Err(_) => top.text.push_str(&String::from_utf8_lossy(&t)),
                    }
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "malformed XML at byte {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(format!(
            "unexpected end of document: <{}> is never closed",
            open.name
        ));
    }

    root.ok_or_else(|| "document has no root element".to_string())
}

fn element_from(start: &BytesStart) -> Result<XmlElement, String> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let local = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();

    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| format!("malformed attribute in <{}>: {}", name, e))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
        attributes.push((key, value));
    }

    Ok(XmlElement {
        name,
        local,
        attributes,
        children: Vec::new(),
        text: String::new(),
    })
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), String> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        Ok(())
    } else if root.is_none() {
        *root = Some(element);
        Ok(())
    } else {
        Err(format!("multiple root elements (second is <{}>)", element.name))
    }
}
