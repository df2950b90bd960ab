//! Graph queries that flatten a CIM model into one table per component kind.
//!
//! Every query returns a table with a fixed column list, including when
//! nothing matched. Two-terminal equipment is reduced to one row per entity
//! with `bus_1` / `bus_2`; entities with fewer than two distinct buses are
//! dropped with a warning.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use gridconv_core::phase::canonical_phase_string;
use gridconv_core::Diagnostics;
use tracing::warn;

use crate::rdf::{not_exists, optional, t, Graph, Pattern, SelectQuery};
use crate::table::{join_numbers, Record, Table};

pub const BUS_COLUMNS: &[&str] = &["x", "y", "rated_voltage", "bus"];
pub const LINE_CODE_COLUMNS: &[&str] = &[
    "line_code",
    "phase_count",
    "r",
    "x",
    "b",
    "ampacity_normal",
    "ampacity_emergency",
];
pub const LINE_COLUMNS: &[&str] = &[
    "line",
    "voltage",
    "length",
    "phase_count",
    "line_code",
    "bus_1",
    "phases_1",
    "bus_2",
    "phases_2",
];
pub const SWITCH_COLUMNS: &[&str] = &[
    "switch_name",
    "capacity",
    "ratedCurrent",
    "normally_open",
    "is_open",
    "voltage",
    "bus_1",
    "bus_2",
];
pub const REGULATOR_COLUMNS: &[&str] = &[
    "xfmr",
    "apparent_power",
    "rated_voltage",
    "per_resistance",
    "conn",
    "angle",
    "winding",
    "bus",
    "xfmr_end",
    "phase",
    "max_tap",
    "min_tap",
    "neutral_tap",
    "normal_tap",
    "dv",
    "current_tap",
    "z_1_leakage",
    "z_0_leakage",
    "z_1_loadloss",
    "z_0_loadloss",
];
pub const TRANSFORMER_COLUMNS: &[&str] = &[
    "xfmr",
    "apparent_power",
    "rated_voltage",
    "vector_group",
    "per_resistance",
    "conn",
    "angle",
    "winding",
    "bus",
    "xfmr_end",
];
pub const WINDING_COLUMNS: &[&str] = &["winding", "r1", "x1", "r0", "x0", "xfmr_end_1", "xfmr_end_2"];
pub const CAPACITOR_COLUMNS: &[&str] = &[
    "capacitor",
    "rated_voltage",
    "conn",
    "bus",
    "b1",
    "g1",
    "b0",
    "g0",
    "phase",
    "steps",
];
pub const SOURCE_COLUMNS: &[&str] = &[
    "source",
    "rated_voltage",
    "src_voltage",
    "src_angle",
    "r1",
    "x1",
    "r0",
    "x0",
    "bus",
];
pub const LOAD_COLUMNS: &[&str] = &[
    "load",
    "active power",
    "reactive power",
    "rated_voltage",
    "grounded",
    "phase",
    "conn",
    "bus",
    "z_p",
    "i_p",
    "p_p",
    "z_q",
    "i_q",
    "p_q",
    "p_exp",
    "q_exp",
];
pub const BATTERY_COLUMNS: &[&str] = &[
    "battery",
    "rated_energy",
    "stored_energy",
    "max_p",
    "p",
    "q",
    "rated_s",
    "rated_voltage",
    "phase",
    "bus",
];
pub const SOLAR_COLUMNS: &[&str] = &[
    "solar",
    "max_p",
    "p",
    "q",
    "rated_s",
    "rated_voltage",
    "phase",
    "bus",
];
pub const REGULATOR_CONTROLLER_COLUMNS: &[&str] = &[
    "regulator",
    "neutral_voltage",
    "initial_delay",
    "subsequent_delay",
    "ltc_flag",
    "enabled",
    "pt_ratio",
    "ct_ratio",
    "ct_rating",
    "mode",
    "bus",
    "phase",
    "target",
    "deadband",
    "ldc",
    "line_drop_r",
    "line_drop_x",
    "reversible",
    "max_voltage",
    "min_voltage",
];

/// Patterns binding `?node_name` for a terminal of `equipment`.
fn terminal_node(equipment: &str) -> Vec<Pattern> {
    vec![
        t("?term", "cim:Terminal.ConductingEquipment", equipment),
        t("?term", "a", "cim:Terminal"),
        t("?term", "cim:Terminal.ConnectivityNode", "?node"),
        t("?node", "cim:IdentifiedObject.name", "?node_name"),
    ]
}

fn base_voltage(equipment: &str, var: &str) -> Vec<Pattern> {
    vec![
        t(equipment, "cim:ConductingEquipment.BaseVoltage", "?base_voltage"),
        t("?base_voltage", "cim:BaseVoltage.nominalVoltage", var),
    ]
}

pub fn query_line_codes(graph: &Graph) -> Table {
    let raw = SelectQuery::new(
        &["?line_code", "?phase_count", "?r", "?x", "?b", "?row", "?column", "?ampacity"],
        vec![
            t("?term", "a", "cim:Terminal"),
            t("?term", "cim:Terminal.ConductingEquipment", "?line"),
            t("?term", "cim:ACDCTerminal.OperationalLimitSet", "?oplimset"),
            t("?line", "cim:ACLineSegment.PerLengthImpedance", "?pu_phs_imp"),
            t("?pu_phs_imp", "cim:IdentifiedObject.name", "?line_code"),
            t("?pu_phs_imp", "cim:PerLengthPhaseImpedance.conductorCount", "?phase_count"),
            t("?phase_imp_data", "cim:PhaseImpedanceData.PhaseImpedance", "?pu_phs_imp"),
            t("?phase_imp_data", "a", "cim:PhaseImpedanceData"),
            t("?phase_imp_data", "cim:PhaseImpedanceData.r", "?r"),
            t("?phase_imp_data", "cim:PhaseImpedanceData.x", "?x"),
            t("?phase_imp_data", "cim:PhaseImpedanceData.b", "?b"),
            t("?phase_imp_data", "cim:PhaseImpedanceData.row", "?row"),
            t("?phase_imp_data", "cim:PhaseImpedanceData.column", "?column"),
            t("?curr_lim", "cim:OperationalLimit.OperationalLimitSet", "?oplimset"),
            t("?curr_lim", "a", "cim:CurrentLimit"),
            t("?curr_lim", "cim:CurrentLimit.value", "?ampacity"),
        ],
    )
    .run(
        graph,
        &["line_code", "phase_count", "r", "x", "b", "row", "column", "ampacity"],
    );

    let mut out = Table::new(LINE_CODE_COLUMNS);
    for code in raw.unique("line_code") {
        let rows = raw.filter("line_code", &code);
        let ampacities: Vec<f64> = raw_unique(&rows, "ampacity")
            .iter()
            .filter_map(|a| a.trim().parse().ok())
            .collect();
        let first_ampacity = rows.first().and_then(|r| r.get("ampacity"));

        // (row, column) -> (r, x, b), summed like a pivot
        let mut cells: BTreeMap<(usize, usize), [f64; 3]> = BTreeMap::new();
        for row in rows.iter().filter(|r| r.get("ampacity") == first_ampacity) {
            let (Some(i), Some(j)) = (index_cell(row.get("row")), index_cell(row.get("column")))
            else {
                continue;
            };
            let cell = cells.entry((i, j)).or_default();
            cell[0] += row.f64_or("r", 0.0);
            cell[1] += row.f64_or("x", 0.0);
            cell[2] += row.f64_or("b", 0.0);
        }
        let indices: BTreeSet<usize> = cells.keys().flat_map(|(i, j)| [*i, *j]).collect();
        let indices: Vec<usize> = indices.into_iter().collect();
        let mut lower = [Vec::new(), Vec::new(), Vec::new()];
        for (a, i) in indices.iter().enumerate() {
            for j in indices.iter().take(a + 1) {
                let cell = cells
                    .get(&(*i, *j))
                    .or_else(|| cells.get(&(*j, *i)))
                    .copied()
                    .unwrap_or_default();
                for (k, values) in lower.iter_mut().enumerate() {
                    values.push(cell[k]);
                }
            }
        }

        let normal = ampacities.iter().copied().fold(f64::INFINITY, f64::min);
        let emergency = ampacities.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        out.push(vec![
            Some(code.clone()),
            rows.first().and_then(|r| r.get("phase_count")).map(String::from),
            Some(join_numbers(&lower[0])),
            Some(join_numbers(&lower[1])),
            Some(join_numbers(&lower[2])),
            normal.is_finite().then(|| normal.to_string()),
            emergency.is_finite().then(|| emergency.to_string()),
        ]);
    }
    out
}

fn index_cell(value: Option<&str>) -> Option<usize> {
    value.and_then(|v| v.trim().parse::<f64>().ok()).map(|v| v as usize)
}

fn raw_unique(rows: &[crate::table::Row<'_>], column: &str) -> Vec<String> {
    let mut seen = Vec::<String>::new();
    for value in rows.iter().filter_map(|r| r.get(column)) {
        if !seen.iter().any(|s| s == value) {
            seen.push(value.to_string());
        }
    }
    seen
}

pub fn query_load_break_switches(graph: &Graph, diagnostics: &mut Diagnostics) -> Table {
    let mut patterns = vec![
        t("?switch", "a", "cim:LoadBreakSwitch"),
        t("?switch", "cim:IdentifiedObject.name", "?switch_name"),
        t("?switch", "cim:ProtectedSwitch.breakingCapacity", "?capacity"),
    ];
    patterns.extend(switch_body());
    switching_devices(graph, patterns, "Switch", diagnostics)
}

pub fn query_fuses(graph: &Graph, diagnostics: &mut Diagnostics) -> Table {
    let mut patterns = vec![
        t("?switch", "a", "cim:Fuse"),
        t("?switch", "cim:IdentifiedObject.name", "?switch_name"),
    ];
    patterns.extend(switch_body());
    switching_devices(graph, patterns, "Fuse", diagnostics)
}

pub fn query_reclosers(graph: &Graph, diagnostics: &mut Diagnostics) -> Table {
    let mut patterns = vec![
        t("?switch", "a", "cim:Recloser"),
        t("?switch", "cim:IdentifiedObject.name", "?switch_name"),
        optional(vec![t(
            "?switch",
            "cim:ProtectedSwitch.breakingCapacity",
            "?capacity",
        )]),
    ];
    patterns.extend(switch_body());
    switching_devices(graph, patterns, "Recloser", diagnostics)
}

fn switch_body() -> Vec<Pattern> {
    let mut patterns = vec![
        t("?switch", "cim:Switch.ratedCurrent", "?rated_current"),
        t("?switch", "cim:Switch.normalOpen", "?normally_open"),
        t("?switch", "cim:Switch.open", "?is_open"),
    ];
    patterns.extend(base_voltage("?switch", "?voltage"));
    patterns.extend(terminal_node("?switch"));
    patterns
}

fn switching_devices(
    graph: &Graph,
    patterns: Vec<Pattern>,
    label: &str,
    diagnostics: &mut Diagnostics,
) -> Table {
    let raw = SelectQuery::new(
        &[
            "?switch_name",
            "?capacity",
            "?rated_current",
            "?normally_open",
            "?is_open",
            "?voltage",
            "?node_name",
        ],
        patterns,
    )
    .run(
        graph,
        &[
            "switch_name",
            "capacity",
            "ratedCurrent",
            "normally_open",
            "is_open",
            "voltage",
            "bus",
        ],
    );

    let mut out = Table::new(SWITCH_COLUMNS);
    for name in raw.unique("switch_name") {
        let rows = raw.filter("switch_name", &name);
        let buses = raw_unique(&rows, "bus");
        if buses.len() < 2 {
            warn!(device = %name, buses = buses.len(), "skipping {} with fewer than 2 buses", label);
            diagnostics.add_warning_with_entity(
                "topology",
                &format!(
                    "{} '{}' has fewer than 2 buses ({}), skipping",
                    label,
                    name,
                    buses.len()
                ),
                &name,
            );
            continue;
        }
        for row in &rows {
            let mut record: Record = row
                .to_record()
                .into_iter()
                .filter(|(column, _)| column != "bus")
                .collect();
            record.push(("bus_1".into(), Some(buses[0].clone())));
            record.push(("bus_2".into(), Some(buses[1].clone())));
            out.push_record(record);
        }
    }
    out.dedup();
    out
}

pub fn query_line_segments(graph: &Graph, diagnostics: &mut Diagnostics) -> Table {
    let mut patterns = vec![
        t("?line", "a", "cim:ACLineSegment"),
        t("?line", "cim:IdentifiedObject.name", "?line_name"),
    ];
    patterns.extend(base_voltage("?line", "?voltage"));
    patterns.extend([
        t("?line", "cim:Conductor.length", "?length"),
        t("?line_phase", "cim:ACLineSegmentPhase.ACLineSegment", "?line"),
        t("?line_phase", "cim:ACLineSegmentPhase.phase", "?phase"),
    ]);
    patterns.extend(terminal_node("?line"));
    patterns.extend([
        t("?line", "cim:ACLineSegment.PerLengthImpedance", "?puimp"),
        t("?puimp", "cim:PerLengthPhaseImpedance.conductorCount", "?phase_count"),
        t("?puimp", "cim:IdentifiedObject.name", "?line_code"),
    ]);
    let raw = SelectQuery::new(
        &[
            "?line_name",
            "?voltage",
            "?length",
            "?node_name",
            "?phase_count",
            "?line_code",
            "?phase",
        ],
        patterns,
    )
    .run(
        graph,
        &["line", "voltage", "length", "bus", "phase_count", "line_code", "phase"],
    );

    let mut out = Table::new(LINE_COLUMNS);
    for name in raw.unique("line") {
        let rows = raw.filter("line", &name);
        let buses = raw_unique(&rows, "bus");
        if buses.len() < 2 {
            warn!(line = %name, buses = buses.len(), "skipping line with fewer than 2 buses");
            diagnostics.add_warning_with_entity(
                "topology",
                &format!(
                    "Line '{}' has fewer than 2 buses ({}), skipping",
                    name,
                    buses.len()
                ),
                &name,
            );
            continue;
        }
        let phases_at = |bus: &str| {
            canonical_phase_string(
                rows.iter()
                    .filter(|r| r.get("bus") == Some(bus))
                    .filter_map(|r| r.get("phase")),
            )
        };
        let phases_1 = phases_at(&buses[0]);
        let phases_2 = phases_at(&buses[1]);
        for row in &rows {
            out.push(vec![
                Some(name.clone()),
                row.get("voltage").map(String::from),
                row.get("length").map(String::from),
                row.get("phase_count").map(String::from),
                row.get("line_code").map(String::from),
                Some(buses[0].clone()),
                phases_1.clone(),
                Some(buses[1].clone()),
                phases_2.clone(),
            ]);
        }
    }
    out.dedup();
    out
}

/// Buses with their highest observed nominal voltage and, where the
/// location data pins it down, a coordinate.
pub fn query_distribution_buses(graph: &Graph, diagnostics: &mut Diagnostics) -> Table {
    let locations = SelectQuery::new(
        &["?x", "?y", "?location_id"],
        vec![
            t("?point", "a", "cim:PositionPoint"),
            t("?point", "cim:PositionPoint.xPosition", "?x"),
            t("?point", "cim:PositionPoint.yPosition", "?y"),
            t("?point", "cim:PositionPoint.Location", "?location"),
            t("?location", "cim:IdentifiedObject.mRID", "?location_id"),
        ],
    )
    .run(graph, &["x", "y", "location_id"]);
    let mut location_points: HashMap<String, BTreeSet<(String, String)>> = HashMap::new();
    for row in locations.rows() {
        if let (Some(x), Some(y), Some(id)) = (row.get("x"), row.get("y"), row.get("location_id")) {
            location_points
                .entry(id.to_string())
                .or_default()
                .insert((x.to_string(), y.to_string()));
        }
    }

    let data = SelectQuery::new(
        &[
            "?term_name",
            "?node_name",
            "?equip_name",
            "?xfmr_voltage",
            "?line_voltage",
            "?reg_loc_id",
            "?xfmr_loc_id",
            "?line_loc_id",
        ],
        vec![
            t("?node", "a", "cim:ConnectivityNode"),
            t("?term", "cim:Terminal.ConnectivityNode", "?node"),
            t("?term", "cim:IdentifiedObject.name", "?term_name"),
            t("?node", "cim:IdentifiedObject.name", "?node_name"),
            t("?term", "cim:Terminal.ConductingEquipment", "?equip"),
            t("?equip", "cim:IdentifiedObject.name", "?equip_name"),
            optional(vec![
                t("?xfmr", "cim:TransformerEnd.Terminal", "?term"),
                t("?xfmr", "cim:TransformerEnd.BaseVoltage", "?xfmr_base_voltage"),
                t("?xfmr_base_voltage", "cim:BaseVoltage.nominalVoltage", "?xfmr_voltage"),
            ]),
            optional(vec![
                t("?xfmr_tank", "cim:TransformerTank.PowerTransformer", "?equip"),
                t("?xfmr_tank", "cim:PowerSystemResource.Location", "?xfmr_location"),
                t("?xfmr_location", "cim:IdentifiedObject.mRID", "?xfmr_loc_id"),
            ]),
            optional(vec![
                t("?reg_control", "cim:RegulatingControl.Terminal", "?term"),
                t("?reg_control", "cim:PowerSystemResource.Location", "?reg_location"),
                t("?reg_location", "cim:IdentifiedObject.mRID", "?reg_loc_id"),
            ]),
            optional(vec![
                t("?equip", "cim:PowerSystemResource.Location", "?line_location"),
                t("?line_location", "cim:IdentifiedObject.mRID", "?line_loc_id"),
                t("?equip", "cim:ConductingEquipment.BaseVoltage", "?line_base_voltage"),
                t("?line_base_voltage", "cim:BaseVoltage.nominalVoltage", "?line_voltage"),
                not_exists(vec![t("?_te", "cim:TransformerEnd.Terminal", "?term")]),
            ]),
        ],
    )
    .run(
        graph,
        &[
            "term_name",
            "node",
            "equipment",
            "xfmr_voltage",
            "line_voltage",
            "reg_loc_id",
            "xfmr_loc_id",
            "line_loc_id",
        ],
    );

    let mut out = Table::new(BUS_COLUMNS);
    if data.is_empty() {
        return out;
    }

    let mut voltages: BTreeMap<String, f64> = BTreeMap::new();
    let mut location_ids: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for row in data.rows() {
        let Some(node) = row.get("node") else {
            continue;
        };
        let voltage = non_nan(row.f64("xfmr_voltage")).max(non_nan(row.f64("line_voltage")));
        let slot = voltages.entry(node.to_string()).or_insert(voltage);
        *slot = slot.max(voltage);
        let ids = location_ids.entry(node.to_string()).or_default();
        for column in ["reg_loc_id", "xfmr_loc_id", "line_loc_id"] {
            if let Some(id) = row.get(column) {
                ids.push(id.to_string());
            }
        }
    }

    let coordinates = resolve_coordinates(&location_ids, &location_points, diagnostics);
    for (node, voltage) in voltages {
        let (x, y) = match coordinates.get(&node) {
            Some((x, y)) => (Some(x.clone()), Some(y.clone())),
            None => (None, None),
        };
        out.push(vec![x, y, Some(voltage.to_string()), Some(node)]);
    }
    out
}

fn non_nan(value: Option<f64>) -> f64 {
    value.filter(|v| !v.is_nan()).unwrap_or(0.0)
}

/// Intersect the point sets of every location referenced at a node. A
/// single survivor is the coordinate; ambiguous nodes drop points already
/// claimed by resolved nodes before giving up.
fn resolve_coordinates(
    location_ids: &BTreeMap<String, Vec<String>>,
    location_points: &HashMap<String, BTreeSet<(String, String)>>,
    diagnostics: &mut Diagnostics,
) -> BTreeMap<String, (String, String)> {
    let mut resolved = BTreeMap::new();
    let mut ambiguous = BTreeMap::new();
    for (node, ids) in location_ids {
        let mut common: Option<BTreeSet<(String, String)>> = None;
        for points in ids.iter().filter_map(|id| location_points.get(id)) {
            common = Some(match common {
                Some(acc) => acc.intersection(points).cloned().collect(),
                None => points.clone(),
            });
        }
        let Some(common) = common else {
            continue;
        };
        if common.len() == 1 {
            resolved.insert(node.clone(), common.into_iter().next().unwrap_or_default());
        } else {
            ambiguous.insert(node.clone(), common);
        }
    }

    let claimed: BTreeSet<(String, String)> = resolved.values().cloned().collect();
    let mut fixes = BTreeMap::new();
    for (node, candidates) in ambiguous {
        if candidates.len() < 2 {
            continue;
        }
        let remaining: Vec<_> = candidates.difference(&claimed).cloned().collect();
        if remaining.len() == 1 {
            fixes.insert(node, remaining[0].clone());
        } else {
            warn!(node = %node, candidates = remaining.len(), "ambiguous bus location");
            diagnostics.add_warning_with_entity(
                "geometry",
                &format!(
                    "Node {} has more than 1 location. Please correct this manually",
                    node
                ),
                &node,
            );
        }
    }
    resolved.extend(fixes);
    resolved
}

pub fn query_distribution_regulators(graph: &Graph) -> Table {
    let mut patterns = vec![
        t("?xfmr", "a", "cim:TransformerTank"),
        t("?xfmr", "cim:TransformerTank.TransformerTankInfo", "?xfmr_info"),
        t("?xfmr", "cim:IdentifiedObject.name", "?xfmr_name"),
        t("?xfmr", "cim:TransformerTank.PowerTransformer", "?pwr_xfmr"),
        t("?xfmr_end", "cim:TransformerEndInfo.TransformerTankInfo", "?xfmr_info"),
        t("?xfmr_end", "a", "cim:TransformerEndInfo"),
        t("?xfmr_end", "cim:TransformerEndInfo.ratedS", "?apparent_power"),
        t("?xfmr_end", "cim:TransformerEndInfo.ratedU", "?rated_voltage"),
        t("?xfmr_end", "cim:TransformerEndInfo.r", "?per_resistance"),
        t("?xfmr_end", "cim:TransformerEndInfo.connectionKind", "?conn"),
        t("?xfmr_end", "cim:TransformerEndInfo.phaseAngleClock", "?angle"),
        t("?xfmr_end", "cim:TransformerEndInfo.endNumber", "?winding"),
        t("?xfmr_end", "cim:IdentifiedObject.name", "?xfmr_end_name"),
    ];
    patterns.extend(terminal_node("?pwr_xfmr"));
    patterns.extend([
        t("?xfmr_tank_end", "cim:TransformerTankEnd.TransformerTank", "?xfmr"),
        t("?xfmr_tank_end", "a", "cim:TransformerTankEnd"),
        optional(vec![t(
            "?xfmr_tank_end",
            "cim:TransformerTankEnd.orderedPhases",
            "?phases",
        )]),
        optional(vec![
            t("?tap_chgr", "cim:RatioTapChanger.TransformerEnd", "?xfmr_tank_end"),
            t("?tap_chgr", "a", "cim:RatioTapChanger"),
            t("?tap_chgr", "cim:TapChanger.highStep", "?max_tap"),
            t("?tap_chgr", "cim:TapChanger.lowStep", "?min_tap"),
            t("?tap_chgr", "cim:TapChanger.neutralStep", "?neutral_tap"),
            t("?tap_chgr", "cim:TapChanger.normalStep", "?normal_tap"),
            t("?tap_chgr", "cim:RatioTapChanger.stepVoltageIncrement", "?dv"),
            t("?tap_chgr", "cim:TapChanger.step", "?current_tap"),
        ]),
        optional(vec![
            t("?sc_test", "cim:ShortCircuitTest.EnergisedEnd", "?xfmr_end"),
            t("?sc_test", "cim:ShortCircuitTest.leakageImpedance", "?z_1_leakage"),
            t("?sc_test", "cim:ShortCircuitTest.leakageImpedanceZero", "?z_0_leakage"),
            t("?sc_test", "cim:ShortCircuitTest.loss", "?z_1_loadloss"),
            t("?sc_test", "cim:ShortCircuitTest.lossZero", "?z_0_loadloss"),
        ]),
    ]);
    SelectQuery::new(
        &[
            "?xfmr_name",
            "?apparent_power",
            "?rated_voltage",
            "?per_resistance",
            "?conn",
            "?angle",
            "?winding",
            "?node_name",
            "?xfmr_end_name",
            "?phases",
            "?max_tap",
            "?min_tap",
            "?neutral_tap",
            "?normal_tap",
            "?dv",
            "?current_tap",
            "?z_1_leakage",
            "?z_0_leakage",
            "?z_1_loadloss",
            "?z_0_loadloss",
        ],
        patterns,
    )
    .run(graph, REGULATOR_COLUMNS)
}

pub fn query_power_transformers(graph: &Graph) -> Table {
    SelectQuery::new(
        &[
            "?xfmr_name",
            "?apparent_power",
            "?rated_voltage",
            "?vector_group",
            "?per_resistance",
            "?conn",
            "?angle",
            "?winding",
            "?node_name",
            "?xfmr_end_name",
        ],
        vec![
            t("?xfmr", "a", "cim:PowerTransformer"),
            t("?xfmr", "cim:IdentifiedObject.name", "?xfmr_name"),
            t("?xfmr", "cim:PowerTransformer.vectorGroup", "?vector_group"),
            t("?xfmr_end", "cim:PowerTransformerEnd.PowerTransformer", "?xfmr"),
            t("?xfmr_end", "cim:PowerTransformerEnd.ratedS", "?apparent_power"),
            t("?xfmr_end", "cim:PowerTransformerEnd.ratedU", "?rated_voltage"),
            t("?xfmr_end", "cim:PowerTransformerEnd.r", "?per_resistance"),
            t("?xfmr_end", "cim:PowerTransformerEnd.connectionKind", "?conn"),
            t("?xfmr_end", "cim:PowerTransformerEnd.phaseAngleClock", "?angle"),
            t("?xfmr_end", "cim:TransformerEnd.endNumber", "?winding"),
            t("?xfmr_end", "cim:IdentifiedObject.name", "?xfmr_end_name"),
            t("?xfmr_end", "cim:TransformerEnd.Terminal", "?term"),
            t("?term", "cim:Terminal.ConductingEquipment", "?xfmr"),
            t("?term", "cim:Terminal.ConnectivityNode", "?node"),
            t("?node", "cim:IdentifiedObject.name", "?node_name"),
            not_exists(vec![t(
                "?_tank",
                "cim:TransformerTank.PowerTransformer",
                "?xfmr",
            )]),
        ],
    )
    .run(graph, TRANSFORMER_COLUMNS)
}

pub fn query_transformer_windings(graph: &Graph) -> Table {
    SelectQuery::new(
        &[
            "?winding_name",
            "?r1",
            "?x1",
            "?r0",
            "?x0",
            "?xfmr_end_name_1",
            "?xfmr_end_name_2",
        ],
        vec![
            t("?xfmr_imp", "a", "cim:TransformerMeshImpedance"),
            t("?xfmr_imp", "cim:IdentifiedObject.name", "?winding_name"),
            t("?xfmr_imp", "cim:TransformerMeshImpedance.r", "?r1"),
            t("?xfmr_imp", "cim:TransformerMeshImpedance.x", "?x1"),
            t("?xfmr_imp", "cim:TransformerMeshImpedance.r0", "?r0"),
            t("?xfmr_imp", "cim:TransformerMeshImpedance.x0", "?x0"),
            t("?xfmr_imp", "cim:TransformerMeshImpedance.FromTransformerEnd", "?xfmr_end_1"),
            t("?xfmr_imp", "cim:TransformerMeshImpedance.ToTransformerEnd", "?xfmr_end_2"),
            t("?xfmr_end_1", "cim:IdentifiedObject.name", "?xfmr_end_name_1"),
            t("?xfmr_end_2", "cim:IdentifiedObject.name", "?xfmr_end_name_2"),
        ],
    )
    .run(graph, WINDING_COLUMNS)
}

pub fn query_capacitors(graph: &Graph) -> Table {
    let mut patterns = vec![
        t("?cap", "a", "cim:LinearShuntCompensator"),
        t("?cap", "cim:IdentifiedObject.name", "?cap_name"),
        t("?cap", "cim:ShuntCompensator.phaseConnection", "?conn"),
    ];
    patterns.extend(base_voltage("?cap", "?rated_voltage"));
    patterns.extend(terminal_node("?cap"));
    patterns.extend([
        t("?cap", "cim:LinearShuntCompensator.bPerSection", "?b1"),
        t("?cap", "cim:LinearShuntCompensator.gPerSection", "?g1"),
        t("?cap", "cim:LinearShuntCompensator.b0PerSection", "?b0"),
        t("?cap", "cim:LinearShuntCompensator.g0PerSection", "?g0"),
        t("?cap", "cim:ShuntCompensator.sections", "?steps"),
        optional(vec![
            t("?phs_cap", "cim:ShuntCompensatorPhase.ShuntCompensator", "?cap"),
            t("?phs_cap", "a", "cim:LinearShuntCompensatorPhase"),
            t("?phs_cap", "cim:ShuntCompensatorPhase.phase", "?phase"),
        ]),
    ]);
    SelectQuery::new(
        &[
            "?cap_name",
            "?rated_voltage",
            "?conn",
            "?node_name",
            "?b1",
            "?g1",
            "?b0",
            "?g0",
            "?phase",
            "?steps",
        ],
        patterns,
    )
    .run(graph, CAPACITOR_COLUMNS)
}

pub fn query_source(graph: &Graph) -> Table {
    let mut patterns = vec![
        t("?src", "a", "cim:EnergySource"),
        t("?src", "cim:IdentifiedObject.name", "?src_name"),
        t("?src", "cim:EnergySource.nominalVoltage", "?rated_voltage"),
        t("?src", "cim:EnergySource.voltageMagnitude", "?src_voltage"),
        t("?src", "cim:EnergySource.voltageAngle", "?src_angle"),
        t("?src", "cim:EnergySource.r", "?r1"),
        t("?src", "cim:EnergySource.x", "?x1"),
        t("?src", "cim:EnergySource.r0", "?r0"),
        t("?src", "cim:EnergySource.x0", "?x0"),
    ];
    patterns.extend(terminal_node("?src"));
    SelectQuery::new(
        &[
            "?src_name",
            "?rated_voltage",
            "?src_voltage",
            "?src_angle",
            "?r1",
            "?x1",
            "?r0",
            "?x0",
            "?node_name",
        ],
        patterns,
    )
    .run(graph, SOURCE_COLUMNS)
}

pub fn query_loads(graph: &Graph) -> Table {
    let mut patterns = vec![
        t("?load", "a", "cim:EnergyConsumer"),
        t("?load", "cim:IdentifiedObject.name", "?load_name"),
        t("?load", "cim:EnergyConsumer.p", "?p"),
        t("?load", "cim:EnergyConsumer.q", "?q"),
        t("?load", "cim:EnergyConsumer.phaseConnection", "?conn"),
    ];
    patterns.extend(base_voltage("?load", "?rated_voltage"));
    patterns.extend([
        t("?load", "cim:EnergyConsumer.grounded", "?is_grounded"),
        optional(vec![
            t("?phs_load", "cim:EnergyConsumerPhase.EnergyConsumer", "?load"),
            t("?phs_load", "a", "cim:EnergyConsumerPhase"),
            t("?phs_load", "cim:EnergyConsumerPhase.phase", "?phase"),
        ]),
    ]);
    patterns.extend(terminal_node("?load"));
    patterns.extend([
        t("?load", "cim:EnergyConsumer.LoadResponse", "?zip"),
        t("?zip", "cim:LoadResponseCharacteristic.pConstantImpedance", "?z_p"),
        t("?zip", "cim:LoadResponseCharacteristic.pConstantCurrent", "?i_p"),
        t("?zip", "cim:LoadResponseCharacteristic.pConstantPower", "?p_p"),
        t("?zip", "cim:LoadResponseCharacteristic.qConstantImpedance", "?z_q"),
        t("?zip", "cim:LoadResponseCharacteristic.qConstantCurrent", "?i_q"),
        t("?zip", "cim:LoadResponseCharacteristic.qConstantPower", "?p_q"),
        t("?zip", "cim:LoadResponseCharacteristic.pVoltageExponent", "?p_exp"),
        t("?zip", "cim:LoadResponseCharacteristic.qVoltageExponent", "?q_exp"),
    ]);
    SelectQuery::new(
        &[
            "?load_name",
            "?p",
            "?q",
            "?rated_voltage",
            "?is_grounded",
            "?phase",
            "?conn",
            "?node_name",
            "?z_p",
            "?i_p",
            "?p_p",
            "?z_q",
            "?i_q",
            "?p_q",
            "?p_exp",
            "?q_exp",
        ],
        patterns,
    )
    .run(graph, LOAD_COLUMNS)
}

/// Power electronics connection body shared by batteries and PV units.
fn power_electronics(unit_class: &str) -> Vec<Pattern> {
    let mut patterns = vec![
        t("?unit", "a", unit_class),
        t("?unit", "cim:IdentifiedObject.name", "?unit_name"),
        t("?pec", "cim:PowerElectronicsConnection.PowerElectronicsUnit", "?unit"),
        t("?pec", "a", "cim:PowerElectronicsConnection"),
        t("?pec", "cim:PowerElectronicsConnection.maxP", "?max_p"),
        t("?pec", "cim:PowerElectronicsConnection.p", "?p"),
        t("?pec", "cim:PowerElectronicsConnection.q", "?q"),
        optional(vec![t("?pec", "cim:PowerElectronicsConnection.ratedS", "?rated_s")]),
    ];
    patterns.extend(base_voltage("?pec", "?rated_voltage"));
    patterns.extend(terminal_node("?pec"));
    patterns.push(optional(vec![
        t(
            "?pec_phase",
            "cim:PowerElectronicsConnectionPhase.PowerElectronicsConnection",
            "?pec",
        ),
        t("?pec_phase", "a", "cim:PowerElectronicsConnectionPhase"),
        t("?pec_phase", "cim:PowerElectronicsConnectionPhase.phase", "?phase"),
    ]));
    patterns
}

pub fn query_batteries(graph: &Graph) -> Table {
    let mut patterns = power_electronics("cim:BatteryUnit");
    patterns.extend([
        t("?unit", "cim:BatteryUnit.ratedE", "?rated_energy"),
        t("?unit", "cim:BatteryUnit.storedE", "?stored_energy"),
    ]);
    let raw = SelectQuery::new(
        &[
            "?unit_name",
            "?rated_energy",
            "?stored_energy",
            "?max_p",
            "?p",
            "?q",
            "?rated_s",
            "?rated_voltage",
            "?phase",
            "?node_name",
        ],
        patterns,
    )
    .run(graph, BATTERY_COLUMNS);
    reduce_phases(&raw, "battery", "phase")
}

pub fn query_photovoltaics(graph: &Graph) -> Table {
    let raw = SelectQuery::new(
        &[
            "?unit_name",
            "?max_p",
            "?p",
            "?q",
            "?rated_s",
            "?rated_voltage",
            "?phase",
            "?node_name",
        ],
        power_electronics("cim:PhotoVoltaicUnit"),
    )
    .run(graph, SOLAR_COLUMNS);
    reduce_phases(&raw, "solar", "phase")
}

/// One row per `key`: the first row seen, with the phase column replaced by
/// the canonical phase string over all of the entity's rows.
pub fn reduce_phases(table: &Table, key: &str, phase_column: &str) -> Table {
    let columns: Vec<&str> = table.columns().iter().map(String::as_str).collect();
    let mut out = Table::new(&columns);
    for name in table.unique(key) {
        let rows = table.filter(key, &name);
        let phases = canonical_phase_string(rows.iter().filter_map(|r| r.get(phase_column)));
        if let Some(first) = rows.first() {
            let record = first
                .to_record()
                .into_iter()
                .map(|(column, value)| {
                    if column == phase_column {
                        (column, phases.clone())
                    } else {
                        (column, value)
                    }
                })
                .collect();
            out.push_record(record);
        }
    }
    out
}

pub fn query_regulator_controllers(graph: &Graph) -> Table {
    SelectQuery::new(
        &[
            "?regulator",
            "?neutral_voltage",
            "?initial_delay",
            "?subsequent_delay",
            "?ltc_flag",
            "?enabled",
            "?pt_ratio",
            "?ct_ratio",
            "?ct_rating",
            "?mode",
            "?bus_name",
            "?phase",
            "?target",
            "?deadband",
            "?ldc",
            "?line_drop_r",
            "?line_drop_x",
            "?reversible",
            "?max_voltage",
            "?min_voltage",
        ],
        vec![
            t("?tap_changer", "a", "cim:RatioTapChanger"),
            t("?tap_changer", "cim:IdentifiedObject.name", "?regulator"),
            t("?tap_changer", "cim:TapChanger.neutralU", "?neutral_voltage"),
            t("?tap_changer", "cim:TapChanger.initialDelay", "?initial_delay"),
            t("?tap_changer", "cim:TapChanger.subsequentDelay", "?subsequent_delay"),
            t("?tap_changer", "cim:TapChanger.ltcFlag", "?ltc_flag"),
            t("?tap_changer", "cim:TapChanger.controlEnabled", "?enabled"),
            t("?tap_changer", "cim:TapChanger.ptRatio", "?pt_ratio"),
            t("?tap_changer", "cim:TapChanger.ctRatio", "?ct_ratio"),
            t("?tap_changer", "cim:TapChanger.ctRating", "?ct_rating"),
            t("?tap_changer", "cim:TapChanger.TapChangerControl", "?controller"),
            t("?controller", "cim:RegulatingControl.mode", "?mode"),
            t("?controller", "cim:RegulatingControl.Terminal", "?term"),
            t("?term", "cim:Terminal.ConnectivityNode", "?bus"),
            t("?bus", "cim:IdentifiedObject.name", "?bus_name"),
            t("?controller", "cim:RegulatingControl.monitoredPhase", "?phase"),
            t("?controller", "cim:RegulatingControl.targetValue", "?target"),
            t("?controller", "cim:RegulatingControl.targetDeadband", "?deadband"),
            t("?controller", "cim:TapChangerControl.lineDropCompensation", "?ldc"),
            t("?controller", "cim:TapChangerControl.lineDropR", "?line_drop_r"),
            t("?controller", "cim:TapChangerControl.lineDropX", "?line_drop_x"),
            t("?controller", "cim:TapChangerControl.reversible", "?reversible"),
            t("?controller", "cim:TapChangerControl.maxLimitVoltage", "?max_voltage"),
            t("?controller", "cim:TapChangerControl.minLimitVoltage", "?min_voltage"),
        ],
    )
    .run(graph, REGULATOR_CONTROLLER_COLUMNS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdf::parse_rdf_xml;

    #[test]
    fn empty_graph_keeps_every_schema() {
        let graph = Graph::new();
        let mut diagnostics = Diagnostics::new();
        let cases: Vec<(Table, &[&str])> = vec![
            (query_distribution_buses(&graph, &mut diagnostics), BUS_COLUMNS),
            (query_line_codes(&graph), LINE_CODE_COLUMNS),
            (query_line_segments(&graph, &mut diagnostics), LINE_COLUMNS),
            (query_load_break_switches(&graph, &mut diagnostics), SWITCH_COLUMNS),
            (query_fuses(&graph, &mut diagnostics), SWITCH_COLUMNS),
            (query_reclosers(&graph, &mut diagnostics), SWITCH_COLUMNS),
            (query_distribution_regulators(&graph), REGULATOR_COLUMNS),
            (query_power_transformers(&graph), TRANSFORMER_COLUMNS),
            (query_transformer_windings(&graph), WINDING_COLUMNS),
            (query_capacitors(&graph), CAPACITOR_COLUMNS),
            (query_source(&graph), SOURCE_COLUMNS),
            (query_loads(&graph), LOAD_COLUMNS),
            (query_batteries(&graph), BATTERY_COLUMNS),
            (query_photovoltaics(&graph), SOLAR_COLUMNS),
            (query_regulator_controllers(&graph), REGULATOR_CONTROLLER_COLUMNS),
        ];
        for (table, expected) in cases {
            assert!(table.is_empty());
            assert_eq!(table.columns(), expected);
        }
        assert_eq!(diagnostics.warning_count(), 0);
    }

    const SWITCH_DOC: &str = r##"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns:cim="http://iec.ch/TC57/CIM100#">
  <cim:BaseVoltage rdf:about="#bv"><cim:BaseVoltage.nominalVoltage>12470</cim:BaseVoltage.nominalVoltage></cim:BaseVoltage>
  <cim:ConnectivityNode rdf:about="#n1"><cim:IdentifiedObject.name>b1</cim:IdentifiedObject.name></cim:ConnectivityNode>
  <cim:ConnectivityNode rdf:about="#n2"><cim:IdentifiedObject.name>b2</cim:IdentifiedObject.name></cim:ConnectivityNode>
  <cim:LoadBreakSwitch rdf:about="#sw1">
    <cim:IdentifiedObject.name>sw1</cim:IdentifiedObject.name>
    <cim:ProtectedSwitch.breakingCapacity>400</cim:ProtectedSwitch.breakingCapacity>
    <cim:Switch.ratedCurrent>400</cim:Switch.ratedCurrent>
    <cim:Switch.normalOpen>false</cim:Switch.normalOpen>
    <cim:Switch.open>false</cim:Switch.open>
    <cim:ConductingEquipment.BaseVoltage rdf:resource="#bv"/>
  </cim:LoadBreakSwitch>
  <cim:LoadBreakSwitch rdf:about="#sw2">
    <cim:IdentifiedObject.name>sw2</cim:IdentifiedObject.name>
    <cim:ProtectedSwitch.breakingCapacity>400</cim:ProtectedSwitch.breakingCapacity>
    <cim:Switch.ratedCurrent>400</cim:Switch.ratedCurrent>
    <cim:Switch.normalOpen>false</cim:Switch.normalOpen>
    <cim:Switch.open>true</cim:Switch.open>
    <cim:ConductingEquipment.BaseVoltage rdf:resource="#bv"/>
  </cim:LoadBreakSwitch>
  <cim:Terminal rdf:about="#t1"><cim:Terminal.ConductingEquipment rdf:resource="#sw1"/><cim:Terminal.ConnectivityNode rdf:resource="#n1"/></cim:Terminal>
  <cim:Terminal rdf:about="#t2"><cim:Terminal.ConductingEquipment rdf:resource="#sw1"/><cim:Terminal.ConnectivityNode rdf:resource="#n2"/></cim:Terminal>
  <cim:Terminal rdf:about="#t3"><cim:Terminal.ConductingEquipment rdf:resource="#sw2"/><cim:Terminal.ConnectivityNode rdf:resource="#n2"/></cim:Terminal>
</rdf:RDF>"##;

    #[test]
    fn switches_need_two_buses() {
        let mut graph = Graph::new();
        parse_rdf_xml(&mut graph, SWITCH_DOC).unwrap();
        let mut diagnostics = Diagnostics::new();
        let table = query_load_break_switches(&graph, &mut diagnostics);

        assert_eq!(table.columns(), SWITCH_COLUMNS);
        assert_eq!(table.len(), 1);
        let row = table.rows().next().unwrap();
        assert_eq!(row.get("switch_name"), Some("sw1"));
        assert_eq!(row.get("bus_1"), Some("b1"));
        assert_eq!(row.get("bus_2"), Some("b2"));
        assert_eq!(row.get("voltage"), Some("12470"));
        assert_eq!(diagnostics.warning_count(), 1);
    }

    #[test]
    fn phase_reduction_keeps_first_row() {
        let mut table = Table::new(&["battery", "p", "phase"]);
        table.push(vec![Some("bat".into()), Some("10".into()), Some("C".into())]);
        table.push(vec![Some("bat".into()), Some("10".into()), Some("A".into())]);
        table.push(vec![Some("other".into()), Some("5".into()), None]);
        let reduced = reduce_phases(&table, "battery", "phase");
        let rows: Vec<_> = reduced.rows().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("phase"), Some("A,C"));
        assert_eq!(rows[1].get("phase"), None);
    }

    #[test]
    fn ambiguous_locations_use_claimed_points() {
        let mut points = HashMap::new();
        points.insert(
            "loc_a".to_string(),
            BTreeSet::from([("1".to_string(), "1".to_string())]),
        );
        points.insert(
            "loc_b".to_string(),
            BTreeSet::from([
                ("1".to_string(), "1".to_string()),
                ("2".to_string(), "2".to_string()),
            ]),
        );
        let mut ids = BTreeMap::new();
        ids.insert("n1".to_string(), vec!["loc_a".to_string()]);
        ids.insert("n2".to_string(), vec!["loc_b".to_string()]);
        let mut diagnostics = Diagnostics::new();

        let resolved = resolve_coordinates(&ids, &points, &mut diagnostics);
        assert_eq!(resolved["n1"], ("1".to_string(), "1".to_string()));
        assert_eq!(resolved["n2"], ("2".to_string(), "2".to_string()));
        assert_eq!(diagnostics.warning_count(), 0);
    }
}
