//! Reshaping of raw query tables into one row per logical entity.

use std::collections::{BTreeSet, HashMap};

use gridconv_core::ComponentKind;

use crate::table::{Record, Table};

const BUS_COLUMNS: [&str; 3] = ["bus", "bus_1", "bus_2"];
const PHASE_COLUMNS: [&str; 3] = ["phase", "phases_1", "phases_2"];

/// Pivot per-winding transformer rows into one `wdg_{n}_*` row per
/// transformer.
///
/// Each winding takes the first terminal bus that no earlier winding of the
/// same transformer claimed, so windings land on distinct buses when the
/// candidates tie. A mesh impedance row whose end names appear in the
/// transformer row contributes `r1, x1, r0, x0` and its `winding` name.
pub fn build_xfmr_dataset(xfmr_data: &Table, windings: Option<&Table>) -> Table {
    let mut out = Table::new(&["xfmr"]);
    if xfmr_data.is_empty() || !xfmr_data.has_column("xfmr") {
        return out;
    }

    for xfmr in xfmr_data.unique("xfmr") {
        let rows = xfmr_data.filter("xfmr", &xfmr);
        let mut winding_ids: Vec<String> = Vec::new();
        for winding in rows.iter().filter_map(|r| r.get("winding")) {
            if !winding_ids.iter().any(|w| w == winding) {
                winding_ids.push(winding.to_string());
            }
        }

        let mut selected_buses: Vec<String> = Vec::new();
        let mut record: Record = Vec::new();
        for winding in &winding_ids {
            let winding_rows: Vec<_> = rows
                .iter()
                .filter(|r| r.get("winding") == Some(winding.as_str()))
                .collect();
            let mut candidates: Vec<&str> = Vec::new();
            for bus in winding_rows.iter().filter_map(|r| r.get("bus")) {
                if !candidates.contains(&bus) {
                    candidates.push(bus);
                }
            }
            let Some(first) = candidates.first() else {
                continue;
            };
            let selected = candidates
                .iter()
                .find(|c| !selected_buses.iter().any(|s| s == *c))
                .unwrap_or(first)
                .to_string();
            let Some(row) = winding_rows
                .iter()
                .find(|r| r.get("bus") == Some(selected.as_str()))
            else {
                continue;
            };
            selected_buses.push(selected);
            for (column, value) in row.to_record() {
                if matches!(column.as_str(), "xfmr" | "winding" | "bus") {
                    continue;
                }
                record.push((format!("wdg_{}_{}", winding, column), value));
            }
        }
        if selected_buses.is_empty() {
            continue;
        }

        let bus_2 = selected_buses.get(1).unwrap_or(&selected_buses[0]).clone();
        record.push(("bus_1".into(), Some(selected_buses[0].clone())));
        record.push(("bus_2".into(), Some(bus_2)));
        record.push(("xfmr".into(), Some(xfmr.clone())));

        if let Some(windings) = windings {
            let values: BTreeSet<String> = record.iter().filter_map(|(_, v)| v.clone()).collect();
            for mesh in windings.rows() {
                let ends = [mesh.get("xfmr_end_1"), mesh.get("xfmr_end_2")];
                if ends.iter().flatten().any(|end| values.contains(*end)) {
                    for column in ["r0", "r1", "x0", "x1", "winding"] {
                        record.retain(|(c, _)| c != column);
                        record.push((column.to_string(), mesh.get(column).map(String::from)));
                    }
                }
            }
        }
        out.push_record(record);
    }
    out
}

/// Fill the bus table's `phase` column from every other table that pairs a
/// bus column with a phase column. Buses nobody mentions get `A,B,C`.
pub fn set_bus_phases(buses: &mut Table, datasets: &[(ComponentKind, &Table)]) {
    let mut observed: HashMap<String, BTreeSet<char>> = HashMap::new();
    for (kind, table) in datasets {
        if *kind == ComponentKind::DistributionBus || table.is_empty() {
            continue;
        }
        for bus_column in BUS_COLUMNS.iter().filter(|c| table.has_column(c)) {
            for phase_column in PHASE_COLUMNS.iter().filter(|c| table.has_column(c)) {
                for row in table.rows() {
                    let Some(bus) = row.get(bus_column) else {
                        continue;
                    };
                    let letters: Vec<char> = row
                        .get(phase_column)
                        .unwrap_or_default()
                        .chars()
                        .filter(|c| *c != ',' && *c != 'N')
                        .collect();
                    if !letters.is_empty() {
                        observed.entry(bus.to_string()).or_default().extend(letters);
                    }
                }
            }
        }
    }

    let phases = buses
        .rows()
        .map(|row| {
            let text = row
                .get("bus")
                .and_then(|bus| observed.get(bus))
                .filter(|set| !set.is_empty())
                .map(|set| {
                    set.iter()
                        .map(|c| c.to_string())
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_else(|| "A,B,C".to_string());
            Some(text)
        })
        .collect();
    buses.set_column("phase", phases);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xfmr_rows() -> Table {
        let mut table = Table::new(&["xfmr", "rated_voltage", "winding", "bus", "xfmr_end"]);
        for (winding, bus, end, v) in [
            ("1", "hv", "t1_end_1", "12470"),
            ("1", "lv", "t1_end_1", "12470"),
            ("2", "hv", "t1_end_2", "480"),
            ("2", "lv", "t1_end_2", "480"),
        ] {
            table.push(vec![
                Some("t1".into()),
                Some(v.into()),
                Some(winding.into()),
                Some(bus.into()),
                Some(end.into()),
            ]);
        }
        table
    }

    #[test]
    fn windings_take_distinct_buses() {
        let mut mesh = Table::new(&["winding", "r1", "x1", "r0", "x0", "xfmr_end_1", "xfmr_end_2"]);
        mesh.push(vec![
            Some("t1_mesh".into()),
            Some("0.1".into()),
            Some("2.5".into()),
            Some("0.1".into()),
            Some("2.5".into()),
            Some("t1_end_1".into()),
            Some("t1_end_2".into()),
        ]);
        let dataset = build_xfmr_dataset(&xfmr_rows(), Some(&mesh));
        assert_eq!(dataset.len(), 1);
        let row = dataset.rows().next().unwrap();
        assert_eq!(row.get("bus_1"), Some("hv"));
        assert_eq!(row.get("bus_2"), Some("lv"));
        assert_eq!(row.get("wdg_1_rated_voltage"), Some("12470"));
        assert_eq!(row.get("wdg_2_xfmr_end"), Some("t1_end_2"));
        assert_eq!(row.get("x1"), Some("2.5"));
        assert_eq!(row.get("winding"), Some("t1_mesh"));
        assert!(!row.has("wdg_1_bus"));
    }

    #[test]
    fn empty_transformer_table() {
        let dataset = build_xfmr_dataset(&Table::new(&["xfmr", "winding", "bus"]), None);
        assert!(dataset.is_empty());
    }

    #[test]
    fn bus_phases_from_lines_and_loads() {
        let mut buses = Table::new(&["x", "y", "rated_voltage", "bus"]);
        for bus in ["b1", "b2", "b3"] {
            buses.push(vec![None, None, Some("7200".into()), Some(bus.into())]);
        }
        let mut lines = Table::new(&["line", "bus_1", "phases_1", "bus_2", "phases_2"]);
        lines.push(vec![
            Some("l1".into()),
            Some("b1".into()),
            Some("A,N".into()),
            Some("b2".into()),
            Some("C".into()),
        ]);
        let mut loads = Table::new(&["load", "bus", "phase"]);
        loads.push(vec![Some("ld".into()), Some("b2".into()), Some("B".into())]);

        set_bus_phases(
            &mut buses,
            &[
                (ComponentKind::MatrixImpedanceBranch, &lines),
                (ComponentKind::DistributionLoad, &loads),
            ],
        );
        let phases: Vec<_> = buses.rows().map(|r| r.get("phase").unwrap().to_string()).collect();
        // every bus column pairs with every phase column
        assert_eq!(phases, vec!["A,C", "A,B,C", "A,B,C"]);
    }
}
