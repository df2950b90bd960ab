//! OpenDSS script scanner.
//!
//! Scripts are read command by command. `New` and `Edit` define elements,
//! `~`/`More` lines continue the previous definition, `Redirect`/`Compile`
//! pull in other scripts relative to the including file and `BusCoords`
//! loads a coordinate file. Solution and reporting commands are skipped.
//! Class and property names are case-insensitive and stored lowercase;
//! element names keep their case but resolve case-insensitively.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use tracing::debug;

/// One `New` element with its properties in definition order.
#[derive(Debug, Clone)]
pub struct DssElement {
    pub class: String,
    pub name: String,
    pub properties: Vec<(String, String)>,
    pub source: PathBuf,
    pub line: usize,
}

impl DssElement {
    /// `Line.l1`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.class, self.name)
    }

    /// Last value assigned to `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn number(&self, key: &str) -> Result<Option<f64>> {
        self.get(key)
            .map(|value| {
                parse_number(value).with_context(|| {
                    format!(
                        "{}:{}: property '{}' of {}",
                        self.source.display(),
                        self.line,
                        key,
                        self.qualified_name()
                    )
                })
            })
            .transpose()
    }

    pub fn number_or(&self, key: &str, default: f64) -> Result<f64> {
        Ok(self.number(key)?.unwrap_or(default))
    }

    /// Numbers of an array property (`[1 2 3]`, `(1, 2, 3)`, `1 | 2 3`).
    pub fn numbers(&self, key: &str) -> Result<Option<Vec<f64>>> {
        self.get(key)
            .map(|value| {
                split_array(value)
                    .into_iter()
                    .map(parse_number)
                    .collect::<Result<Vec<f64>>>()
                    .with_context(|| {
                        format!(
                            "{}:{}: property '{}' of {}",
                            self.source.display(),
                            self.line,
                            key,
                            self.qualified_name()
                        )
                    })
            })
            .transpose()
    }

    /// `yes`, `true`, `y`, `t` (any case) are true.
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).map(is_true)
    }
}

/// Open or close action on a device conductor.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchAction {
    pub class: String,
    pub name: String,
    /// 1-based conductor; `None` acts on every conductor
    pub conductor: Option<usize>,
    pub close: bool,
}

/// Everything a script tree defines.
#[derive(Debug, Default)]
pub struct DssModel {
    pub elements: Vec<DssElement>,
    /// Lowercase bus name and coordinates, in file order
    pub bus_coords: Vec<(String, f64, f64)>,
    pub switch_actions: Vec<SwitchAction>,
    index: HashMap<(String, String), usize>,
}

impl DssModel {
    /// Read a master script and every script it redirects to.
    pub fn load(path: &Path) -> Result<Self> {
        let mut model = DssModel::default();
        let mut stack = Vec::new();
        model.load_file(path, &mut stack)?;
        debug!(
            elements = model.elements.len(),
            coordinates = model.bus_coords.len(),
            path = %path.display(),
            "loaded OpenDSS scripts"
        );
        Ok(model)
    }

    /// Parse script text; redirects resolve against `base_dir`.
    pub fn parse_str(text: &str, base_dir: &Path) -> Result<Self> {
        let mut model = DssModel::default();
        let mut stack = Vec::new();
        model.parse_script(text, &base_dir.join("<inline>"), &mut stack)?;
        Ok(model)
    }

    pub fn of_class<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a DssElement> + 'a {
        self.elements.iter().filter(move |e| e.class == class)
    }

    pub fn find(&self, class: &str, name: &str) -> Option<&DssElement> {
        self.index
            .get(&(class.to_string(), name.to_lowercase()))
            .map(|&i| &self.elements[i])
    }

    fn load_file(&mut self, path: &Path, stack: &mut Vec<PathBuf>) -> Result<()> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if stack.contains(&canonical) {
            bail!("redirect cycle through '{}'", path.display());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading OpenDSS script '{}'; ensure file exists", path.display()))?;
        stack.push(canonical);
        self.parse_script(&text, path, stack)?;
        stack.pop();
        Ok(())
    }

    fn parse_script(&mut self, text: &str, path: &Path, stack: &mut Vec<PathBuf>) -> Result<()> {
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut in_block_comment = false;
        let mut last: Option<usize> = None;

        for (line_no, raw) in text.lines().enumerate() {
            let line_no = line_no + 1;
            let trimmed = raw.trim();
            if in_block_comment {
                in_block_comment = !trimmed.starts_with("*/");
                continue;
            }
            if trimmed.starts_with("/*") {
                in_block_comment = !trimmed.contains("*/");
                continue;
            }
            let line = strip_comment(trimmed);
            if line.is_empty() {
                continue;
            }
            let at = || format!("{}:{}", path.display(), line_no);
            let (tilde, body) = match line.strip_prefix('~') {
                Some(rest) => (true, rest),
                None => (false, line),
            };
            let tokens = tokenize(body).with_context(at)?;
            let verb = tokens.first().map(|t| t.text.to_lowercase()).unwrap_or_default();
            let more = !tilde && (verb == "more" || verb == "m");

            if tilde || more {
                let Some(idx) = last else {
                    bail!("{}: continuation line without a preceding New or Edit", at());
                };
                let rest = if more { &tokens[1..] } else { &tokens[..] };
                assign_properties(&mut self.elements[idx], rest).with_context(at)?;
                continue;
            }
            let Some(first) = tokens.first() else {
                continue;
            };

            match verb.as_str() {
                "new" | "edit" => {
                    let mut start = 1;
                    if tokens.get(1).is_some_and(|t| t.assigns && t.text.eq_ignore_ascii_case("object")) {
                        start = 2;
                    }
                    let target = tokens
                        .get(start)
                        .ok_or_else(|| anyhow!("{}: '{}' without an element", at(), first.text))?;
                    let (class, name) = split_element(&target.text).with_context(at)?;
                    let idx = if verb == "new" {
                        self.define(class, name, path, line_no)
                    } else {
                        self.lookup(&class, &name)
                            .ok_or_else(|| anyhow!("{}: Edit of undefined element {}.{}", at(), class, name))?
                    };
                    assign_properties(&mut self.elements[idx], &tokens[start + 1..]).with_context(at)?;
                    last = Some(idx);
                }
                "redirect" | "compile" => {
                    let file = tokens
                        .get(1)
                        .ok_or_else(|| anyhow!("{}: '{}' without a file", at(), first.text))?;
                    self.load_file(&base.join(&file.text), stack)?;
                }
                "buscoords" | "latlongcoords" => {
                    let file = tokens
                        .get(1)
                        .ok_or_else(|| anyhow!("{}: '{}' without a file", at(), first.text))?;
                    self.load_bus_coords(&base.join(&file.text))?;
                }
                "open" | "close" => {
                    let target = tokens
                        .get(1)
                        .ok_or_else(|| anyhow!("{}: '{}' without an element", at(), first.text))?;
                    let (class, name) = split_element(&target.text).with_context(at)?;
                    let conductor = match tokens.get(3) {
                        Some(token) => Some(
                            token
                                .text
                                .parse::<usize>()
                                .with_context(|| format!("{}: invalid conductor '{}'", at(), token.text))?,
                        ),
                        None => None,
                    };
                    self.switch_actions.push(SwitchAction {
                        class,
                        name,
                        conductor,
                        close: verb == "close",
                    });
                }
                _ if verb.contains('.') => {
                    // `Line.l1.length=2` style edits
                    let (class, rest) = split_element(&first.text).with_context(at)?;
                    let Some((name, property)) = rest.split_once('.') else {
                        debug!(line = line_no, "skipping bare element reference");
                        continue;
                    };
                    let idx = self
                        .lookup(&class, name)
                        .ok_or_else(|| anyhow!("{}: edit of undefined element {}.{}", at(), class, name))?;
                    let mut assignment = vec![Token::bare(property)];
                    assignment.extend(tokens[1..].iter().cloned());
                    assign_properties(&mut self.elements[idx], &assignment).with_context(at)?;
                    last = Some(idx);
                }
                _ => debug!(command = %verb, line = line_no, "skipping OpenDSS command"),
            }
        }
        Ok(())
    }

    fn define(&mut self, class: String, name: String, path: &Path, line: usize) -> usize {
        let key = (class.clone(), name.to_lowercase());
        if let Some(&idx) = self.index.get(&key) {
            debug!(element = %format!("{}.{}", class, name), "redefinition edits the existing element");
            return idx;
        }
        self.elements.push(DssElement {
            class,
            name,
            properties: Vec::new(),
            source: path.to_path_buf(),
            line,
        });
        let idx = self.elements.len() - 1;
        self.index.insert(key, idx);
        idx
    }

    fn lookup(&self, class: &str, name: &str) -> Option<usize> {
        self.index.get(&(class.to_string(), name.to_lowercase())).copied()
    }

    fn load_bus_coords(&mut self, path: &Path) -> Result<()> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading bus coordinates '{}'", path.display()))?;
        for (line_no, raw) in text.lines().enumerate() {
            let line = strip_comment(raw.trim());
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|f| !f.is_empty())
                .collect();
            if fields.len() < 3 {
                bail!("{}:{}: expected 'bus, x, y'", path.display(), line_no + 1);
            }
            let x = parse_number(fields[1]).with_context(|| format!("{}:{}", path.display(), line_no + 1))?;
            let y = parse_number(fields[2]).with_context(|| format!("{}:{}", path.display(), line_no + 1))?;
            self.bus_coords.push((fields[0].to_lowercase(), x, y));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    text: String,
    /// `=` between this token and the next
    assigns: bool,
}

impl Token {
    fn bare(text: &str) -> Self {
        Self {
            text: text.to_string(),
            assigns: true,
        }
    }
}

/// Property order used for values given without a name.
fn positional_keys(class: &str) -> &'static [&'static str] {
    match class {
        "circuit" | "vsource" => &["bus1", "basekv", "pu", "angle"],
        "line" => &["bus1", "bus2", "linecode", "length"],
        "linecode" => &["nphases", "r1", "x1", "r0", "x0", "c1", "c0", "units"],
        "load" => &["phases", "bus1", "kv", "kw", "pf"],
        "capacitor" => &["bus1", "bus2", "phases", "kvar", "kv"],
        "transformer" => &["phases", "windings", "wdg", "bus", "conn", "kv", "kva", "tap", "%r"],
        "regcontrol" => &["transformer", "winding", "vreg", "band"],
        "capcontrol" => &["element", "terminal", "capacitor", "type"],
        _ => &[],
    }
}

fn assign_properties(element: &mut DssElement, tokens: &[Token]) -> Result<()> {
    let keys = positional_keys(&element.class);
    let mut cursor = 0;
    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        if token.assigns {
            let key = token.text.to_lowercase();
            let value = tokens.get(i + 1).map(|t| t.text.clone()).unwrap_or_default();
            if let Some(pos) = keys.iter().position(|k| *k == key) {
                cursor = pos + 1;
            }
            element.properties.push((key, value));
            i += 2;
        } else {
            let Some(key) = keys.get(cursor) else {
                bail!(
                    "unexpected value '{}' without a property name on {}",
                    token.text,
                    element.qualified_name()
                );
            };
            element.properties.push((key.to_string(), token.text.clone()));
            cursor += 1;
            i += 1;
        }
    }
    Ok(())
}

/// `Line.l1` -> (`line`, `l1`)
fn split_element(text: &str) -> Result<(String, String)> {
    let Some((class, name)) = text.split_once('.') else {
        bail!("expected Class.Name, got '{}'", text);
    };
    if class.is_empty() || name.is_empty() {
        bail!("expected Class.Name, got '{}'", text);
    }
    Ok((class.to_lowercase(), name.to_string()))
}

/// Drop `!` and `//` comments outside quotes and brackets.
fn strip_comment(line: &str) -> &str {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let bytes: Vec<char> = line.chars().collect();
    let mut offset = 0;
    for (i, &c) in bytes.iter().enumerate() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '[' | '(' | '{' => depth += 1,
                ']' | ')' | '}' => depth -= 1,
                '!' if depth <= 0 => return line[..offset].trim_end(),
                '/' if depth <= 0 && bytes.get(i + 1) == Some(&'/') => {
                    return line[..offset].trim_end()
                }
                _ => {}
            },
        }
        offset += c.len_utf8();
    }
    line
}

/// Split a command into tokens. Quotes and brackets group a value;
/// `=` marks the preceding token as a property name.
fn tokenize(line: &str) -> Result<Vec<Token>> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || c == ',' {
            chars.next();
            continue;
        }
        if c == '=' {
            chars.next();
            let Some(last) = tokens.last_mut() else {
                bail!("'=' without a property name");
            };
            last.assigns = true;
            continue;
        }
        let text = match c {
            '"' | '\'' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == c => break,
                        Some(ch) => value.push(ch),
                        None => bail!("unterminated quote in '{}'", line),
                    }
                }
                value
            }
            '[' | '(' | '{' => {
                let close = match c {
                    '[' => ']',
                    '(' => ')',
                    _ => '}',
                };
                chars.next();
                let mut value = String::new();
                let mut depth = 1;
                loop {
                    match chars.next() {
                        Some(ch) if ch == c => {
                            depth += 1;
                            value.push(ch);
                        }
                        Some(ch) if ch == close => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                            value.push(ch);
                        }
                        Some(ch) => value.push(ch),
                        None => bail!("unterminated '{}' in '{}'", c, line),
                    }
                }
                value.trim().to_string()
            }
            _ => {
                let mut value = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || ch == '=' || ch == ',' {
                        break;
                    }
                    value.push(ch);
                    chars.next();
                }
                value
            }
        };
        tokens.push(Token {
            text,
            assigns: false,
        });
    }
    Ok(tokens)
}

pub fn is_true(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "yes" | "y" | "true" | "t")
}

pub fn parse_number(value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| anyhow!("invalid number '{}'", value))
}

/// Array items split on whitespace, commas and `|` row separators.
pub fn split_array(value: &str) -> Vec<&str> {
    value
        .split(|c: char| c.is_whitespace() || c == ',' || c == '|')
        .filter(|item| !item.is_empty())
        .collect()
}

/// `b2.1.2` -> (`b2`, [1, 2]); bus names are lowercased.
pub fn parse_bus(spec: &str) -> Result<(String, Vec<u32>)> {
    let mut parts = spec.split('.');
    let name = parts.next().unwrap_or_default().trim().to_lowercase();
    if name.is_empty() {
        bail!("empty bus name in '{}'", spec);
    }
    let nodes = parts
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<u32>()
                .map_err(|_| anyhow!("invalid node '{}' in bus '{}'", p, spec))
        })
        .collect::<Result<Vec<u32>>>()?;
    Ok((name, nodes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn comments_and_quotes() {
        assert_eq!(strip_comment("New Line.l1 ! comment"), "New Line.l1");
        assert_eq!(strip_comment("New Line.l1 // comment"), "New Line.l1");
        assert_eq!(strip_comment("x=\"a!b\""), "x=\"a!b\"");
        let tokens = tokenize("New Line.l1 bus1 = \"b 1\" rmatrix=[1 | 2 3]").unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["New", "Line.l1", "bus1", "b 1", "rmatrix", "1 | 2 3"]);
        assert!(tokens[2].assigns);
        assert!(!tokens[3].assigns);
    }

    #[test]
    fn new_edit_and_continuation() {
        let script = "\
Clear
New Circuit.demo basekv=12.47
New Line.L1 Bus1=a.1.2.3 Bus2=b
~ Length=2 units=kft
Edit Line.l1 length=3
Line.L1.phases=3
Solve
";
        let model = DssModel::parse_str(script, Path::new(".")).unwrap();
        assert_eq!(model.elements.len(), 2);
        let line = model.find("line", "l1").unwrap();
        assert_eq!(line.name, "L1");
        assert_eq!(line.get("bus1"), Some("a.1.2.3"));
        assert_eq!(line.number("length").unwrap(), Some(3.0));
        assert_eq!(line.get("units"), Some("kft"));
        assert_eq!(line.get("phases"), Some("3"));
    }

    #[test]
    fn positional_values_follow_property_order() {
        let model = DssModel::parse_str("New Line.l1 a b lc 5", Path::new(".")).unwrap();
        let line = model.find("line", "l1").unwrap();
        assert_eq!(line.get("bus2"), Some("b"));
        assert_eq!(line.get("linecode"), Some("lc"));
        assert_eq!(line.number("length").unwrap(), Some(5.0));
    }

    #[test]
    fn continuation_without_element_fails() {
        let err = DssModel::parse_str("~ length=2", Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("continuation line"));
    }

    #[test]
    fn edit_of_unknown_element_fails() {
        let err = DssModel::parse_str("Edit Line.x length=2", Path::new(".")).unwrap_err();
        assert!(format!("{:#}", err).contains("Edit of undefined element line.x"));
    }

    #[test]
    fn open_commands_record_conductors() {
        let model = DssModel::parse_str(
            "New Line.s1 bus1=a bus2=b switch=yes\nOpen Line.s1 1 2\nClose Line.s1",
            Path::new("."),
        )
        .unwrap();
        assert_eq!(model.switch_actions.len(), 2);
        assert_eq!(model.switch_actions[0].conductor, Some(2));
        assert!(!model.switch_actions[0].close);
        assert!(model.switch_actions[1].close);
    }

    #[test]
    fn redirects_and_bus_coords() {
        let dir = tempfile::tempdir().unwrap();
        let mut master = fs::File::create(dir.path().join("Master.dss")).unwrap();
        writeln!(master, "New Circuit.c bus1=src\nRedirect sub/Lines.dss\nBusCoords coords.csv").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/Lines.dss"), "New Line.l1 bus1=src bus2=B2\n").unwrap();
        fs::write(dir.path().join("coords.csv"), "SRC, 1.5, 2\nb2 3 4\n").unwrap();

        let model = DssModel::load(&dir.path().join("Master.dss")).unwrap();
        assert!(model.find("line", "L1").is_some());
        assert_eq!(model.bus_coords, vec![("src".to_string(), 1.5, 2.0), ("b2".to_string(), 3.0, 4.0)]);
    }

    #[test]
    fn redirect_cycle_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.dss"), "Redirect b.dss\n").unwrap();
        fs::write(dir.path().join("b.dss"), "Redirect a.dss\n").unwrap();
        let err = DssModel::load(&dir.path().join("a.dss")).unwrap_err();
        assert!(format!("{:#}", err).contains("redirect cycle"));
    }

    #[test]
    fn bus_specs() {
        assert_eq!(parse_bus("B2.1.3").unwrap(), ("b2".to_string(), vec![1, 3]));
        assert_eq!(parse_bus("b3").unwrap(), ("b3".to_string(), vec![]));
        assert!(parse_bus("b.x").is_err());
        assert_eq!(split_array("1 | 2, 3"), ["1", "2", "3"]);
    }
}
