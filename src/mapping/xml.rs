// CIFTI-2 XML reading and writing through a small element tree.
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::str::FromStr;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

use crate::core::error::{Error, ErrorKind};
use crate::mapping::brain_models::{BrainModelsMap, ModelKind};
use crate::mapping::labels::{Label, LabelTable, LabelsMap, NamedLabelMap};
use crate::mapping::named::{NamedMap, ScalarsMap, SeriesMap};
use crate::mapping::parcels::{Parcel, ParcelsMap};
use crate::mapping::structure::Structure;
use crate::mapping::volume::{Ijk, VolumeSpace};
use crate::mapping::{Axis, CiftiXml, IndexMap, MappingKind};

#[derive(Clone, Debug, Default, PartialEq)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    fn attr(mut self, key: &str, value: impl ToString) -> Self {
        self.attributes.push((key.to_string(), value.to_string()));
        self
    }

    fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    fn required(&self, key: &str) -> Result<&str, Error> {
        self.attribute(key).ok_or_else(|| {
            Error::new(ErrorKind::Format)
                .with_message(format!("<{}> is missing attribute {key}", self.name))
        })
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    fn first_child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }
}

fn xml_error(err: impl StdError + Send + Sync + 'static) -> Error {
    Error::new(ErrorKind::Format)
        .with_message("malformed CIFTI XML")
        .with_source(err)
}

fn parse_tree(text: &str) -> Result<Element, Error> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|err| xml_error(err).with_offset(reader.buffer_position() as u64))?;
        match event {
            Event::Start(start) => stack.push(element_from(&start)?),
            Event::Empty(start) => {
                let element = element_from(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let Some(element) = stack.pop() else {
                    return Err(Error::new(ErrorKind::Format).with_message("unbalanced XML end tag"));
                };
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(content) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&content.unescape().map_err(xml_error)?);
                }
            }
            Event::CData(content) => {
                if let Some(top) = stack.last_mut() {
                    top.text
                        .push_str(&String::from_utf8_lossy(&content.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(Error::new(ErrorKind::Format).with_message("unterminated XML element"));
    }
    root.ok_or_else(|| Error::new(ErrorKind::Format).with_message("empty CIFTI XML"))
}

fn element_from(start: &BytesStart<'_>) -> Result<Element, Error> {
    let mut element = Element::new(&String::from_utf8_lossy(start.name().as_ref()));
    for attribute in start.attributes() {
        let attribute = attribute.map_err(xml_error)?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value().map_err(xml_error)?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<(), Error> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        return Ok(());
    }
    if root.is_some() {
        return Err(Error::new(ErrorKind::Format).with_message("XML has more than one root element"));
    }
    *root = Some(element);
    Ok(())
}

fn write_tree(root: &Element) -> Result<String, Error> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;
    write_element(&mut writer, root)?;
    String::from_utf8(writer.into_inner()).map_err(xml_error)
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<(), Error> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    if element.children.is_empty() && element.text.is_empty() {
        writer.write_event(Event::Empty(start)).map_err(xml_error)?;
        return Ok(());
    }
    writer.write_event(Event::Start(start)).map_err(xml_error)?;
    if !element.text.is_empty() {
        writer
            .write_event(Event::Text(BytesText::new(&element.text)))
            .map_err(xml_error)?;
    }
    for child in &element.children {
        write_element(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(xml_error)?;
    Ok(())
}

fn parse_num<T: FromStr>(value: &str, what: &str) -> Result<T, Error> {
    value.trim().parse::<T>().map_err(|_| {
        Error::new(ErrorKind::Format).with_message(format!("invalid {what} '{}'", value.trim()))
    })
}

fn parse_list<T: FromStr>(text: &str, what: &str) -> Result<Vec<T>, Error> {
    text.split_whitespace().map(|item| parse_num(item, what)).collect()
}

fn parse_ijk_list(text: &str) -> Result<Vec<Ijk>, Error> {
    let values: Vec<i64> = parse_list(text, "voxel index")?;
    if values.len() % 3 != 0 {
        return Err(Error::new(ErrorKind::Format)
            .with_message("voxel index list is not a multiple of three"));
    }
    Ok(values
        .chunks_exact(3)
        .map(|chunk| [chunk[0], chunk[1], chunk[2]])
        .collect())
}

fn ijk_text(voxels: impl IntoIterator<Item = Ijk>) -> String {
    voxels
        .into_iter()
        .map(|[i, j, k]| format!("{i} {j} {k}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn join_numbers<T: ToString>(values: impl IntoIterator<Item = T>) -> String {
    values
        .into_iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses CIFTI-2 XML into a validated mapping model.
pub fn parse(text: &str) -> Result<CiftiXml, Error> {
    let root = parse_tree(text)?;
    if root.name != "CIFTI" {
        return Err(Error::new(ErrorKind::Format)
            .with_message(format!("root element is <{}>, expected <CIFTI>", root.name)));
    }
    let version = root.required("Version")?;
    if !version.trim().starts_with('2') {
        return Err(Error::new(ErrorKind::Format)
            .with_message(format!("unsupported CIFTI version {version}, only CIFTI-2 is supported")));
    }
    let Some(matrix) = root.first_child("Matrix") else {
        return Err(Error::new(ErrorKind::Format).with_message("CIFTI XML has no <Matrix>"));
    };

    let mut rows = None;
    let mut columns = None;
    for element in matrix.children_named("MatrixIndicesMap") {
        let map = parse_index_map(element)?;
        for dimension in element.required("AppliesToMatrixDimension")?.split(',') {
            let dimension: usize = parse_num(dimension, "matrix dimension")?;
            let slot = match Axis::from_xml_dimension(dimension) {
                Some(Axis::Rows) => &mut rows,
                Some(Axis::Columns) => &mut columns,
                None => {
                    return Err(Error::new(ErrorKind::Format).with_message(format!(
                        "matrix dimension {dimension} is not supported for 2-D files"
                    )));
                }
            };
            if slot.is_some() {
                return Err(Error::new(ErrorKind::Format)
                    .with_message(format!("matrix dimension {dimension} is mapped twice")));
            }
            *slot = Some(map.clone());
        }
    }
    let (Some(rows), Some(columns)) = (rows, columns) else {
        return Err(Error::new(ErrorKind::Format)
            .with_message("CIFTI XML must map both matrix dimensions"));
    };

    let mut xml = CiftiXml::new(rows, columns)?;
    if let Some(metadata) = matrix.first_child("MetaData") {
        *xml.metadata_mut() = parse_metadata(metadata)?;
    }
    Ok(xml)
}

/// Serializes the mapping model as CIFTI-2 XML.
pub fn write(xml: &CiftiXml) -> Result<String, Error> {
    let mut matrix = Element::new("Matrix");
    if !xml.metadata().is_empty() {
        matrix = matrix.child(metadata_element(xml.metadata()));
    }
    let columns = xml.map(Axis::Columns);
    let rows = xml.map(Axis::Rows);
    if columns == rows {
        matrix = matrix.child(index_map_element(columns, "0,1"));
    } else {
        matrix = matrix
            .child(index_map_element(columns, &Axis::Columns.xml_dimension().to_string()))
            .child(index_map_element(rows, &Axis::Rows.xml_dimension().to_string()));
    }
    let root = Element::new("CIFTI").attr("Version", "2").child(matrix);
    write_tree(&root)
}

fn parse_metadata(element: &Element) -> Result<BTreeMap<String, String>, Error> {
    let mut out = BTreeMap::new();
    for entry in element.children_named("MD") {
        let Some(name) = entry.first_child("Name") else {
            return Err(Error::new(ErrorKind::Format).with_message("<MD> is missing <Name>"));
        };
        let value = entry
            .first_child("Value")
            .map(|value| value.text.clone())
            .unwrap_or_default();
        out.insert(name.text.clone(), value);
    }
    Ok(out)
}

fn metadata_element(metadata: &BTreeMap<String, String>) -> Element {
    metadata.iter().fold(Element::new("MetaData"), |parent, (name, value)| {
        parent.child(
            Element::new("MD")
                .child(Element::new("Name").text(name.clone()))
                .child(Element::new("Value").text(value.clone())),
        )
    })
}

fn parse_index_map(element: &Element) -> Result<IndexMap, Error> {
    let type_name = element.required("IndicesMapToDataType")?;
    let Some(kind) = MappingKind::from_cifti_name(type_name) else {
        return Err(Error::new(ErrorKind::Format)
            .with_message(format!("unrecognized IndicesMapToDataType '{type_name}'")));
    };
    match kind {
        MappingKind::BrainModels => parse_brain_models(element).map(IndexMap::BrainModels),
        MappingKind::Parcels => parse_parcels(element).map(IndexMap::Parcels),
        MappingKind::Labels => parse_labels(element).map(IndexMap::Labels),
        MappingKind::Scalars => parse_scalars(element).map(IndexMap::Scalars),
        MappingKind::Series => parse_series(element).map(IndexMap::Series),
    }
}

fn index_map_element(map: &IndexMap, dimensions: &str) -> Element {
    let element = Element::new("MatrixIndicesMap")
        .attr("AppliesToMatrixDimension", dimensions)
        .attr("IndicesMapToDataType", map.kind().cifti_name());
    match map {
        IndexMap::BrainModels(models) => brain_models_children(element, models),
        IndexMap::Parcels(parcels) => parcels_children(element, parcels),
        IndexMap::Labels(labels) => labels.maps().iter().fold(element, |parent, map| {
            parent.child(label_map_element(map))
        }),
        IndexMap::Scalars(scalars) => scalars.maps().iter().fold(element, |parent, map| {
            parent.child(named_map_element(map, None))
        }),
        IndexMap::Series(series) => element
            .attr("NumberOfSeriesPoints", series.length)
            .attr("SeriesExponent", series.exponent)
            .attr("SeriesStart", series.start)
            .attr("SeriesStep", series.step)
            .attr("SeriesUnit", series.unit.cifti_name()),
    }
}

fn parse_volume(element: &Element) -> Result<VolumeSpace, Error> {
    let dims: Vec<i64> = element
        .required("VolumeDimensions")?
        .split(',')
        .map(|value| parse_num(value, "volume dimension"))
        .collect::<Result<_, _>>()?;
    let [di, dj, dk] = dims.as_slice() else {
        return Err(Error::new(ErrorKind::Format).with_message("VolumeDimensions must have three values"));
    };
    let Some(transform) = element.first_child("TransformationMatrixVoxelIndicesIJKtoXYZ") else {
        return Err(Error::new(ErrorKind::Format).with_message("<Volume> has no transformation matrix"));
    };
    let exponent: i32 = parse_num(transform.required("MeterExponent")?, "MeterExponent")?;
    let values: Vec<f64> = parse_list(&transform.text, "transform value")?;
    if values.len() != 16 {
        return Err(Error::new(ErrorKind::Format)
            .with_message(format!("transformation matrix has {} values, expected 16", values.len())));
    }
    // stored in millimeters
    let scale = exponent
        .checked_add(3)
        .map(|power| 10f64.powi(power))
        .filter(|scale| scale.is_normal())
        .ok_or_else(|| {
            Error::new(ErrorKind::Format)
                .with_message(format!("MeterExponent {exponent} is out of range"))
        })?;
    let mut sform = [[0.0; 4]; 3];
    for (row, out) in sform.iter_mut().enumerate() {
        for (col, value) in out.iter_mut().enumerate() {
            *value = values[row * 4 + col] * scale;
        }
    }
    VolumeSpace::new([*di, *dj, *dk], sform)
}

fn volume_element(space: &VolumeSpace) -> Element {
    let [di, dj, dk] = space.dims();
    let mut values: Vec<f64> = space.sform().iter().flatten().copied().collect();
    values.extend([0.0, 0.0, 0.0, 1.0]);
    Element::new("Volume")
        .attr("VolumeDimensions", format!("{di},{dj},{dk}"))
        .child(
            Element::new("TransformationMatrixVoxelIndicesIJKtoXYZ")
                .attr("MeterExponent", -3)
                .text(join_numbers(values)),
        )
}

fn parse_brain_models(element: &Element) -> Result<BrainModelsMap, Error> {
    let mut map = BrainModelsMap::new();
    if let Some(volume) = element.first_child("Volume") {
        map.set_volume_space(parse_volume(volume)?)?;
    }
    for model in element.children_named("BrainModel") {
        let structure: Structure = model.required("BrainStructure")?.parse()?;
        let offset: usize = parse_num(model.required("IndexOffset")?, "IndexOffset")?;
        let count: usize = parse_num(model.required("IndexCount")?, "IndexCount")?;
        if offset != map.len() {
            return Err(Error::new(ErrorKind::Format).with_message(format!(
                "brain model {structure} starts at {offset}, expected {}",
                map.len()
            )));
        }
        match model.required("ModelType")?.trim() {
            "CIFTI_MODEL_TYPE_SURFACE" => {
                let vertex_count: i64 =
                    parse_num(model.required("SurfaceNumberOfVertices")?, "SurfaceNumberOfVertices")?;
                let Some(indices) = model.first_child("VertexIndices") else {
                    return Err(Error::new(ErrorKind::Format)
                        .with_message(format!("surface model {structure} has no <VertexIndices>")));
                };
                let vertices: Vec<i64> = parse_list(&indices.text, "vertex index")?;
                map.add_surface_model(structure, vertex_count, Some(&vertices))?;
            }
            "CIFTI_MODEL_TYPE_VOXELS" => {
                let Some(indices) = model.first_child("VoxelIndicesIJK") else {
                    return Err(Error::new(ErrorKind::Format)
                        .with_message(format!("voxel model {structure} has no <VoxelIndicesIJK>")));
                };
                map.add_volume_model(structure, &parse_ijk_list(&indices.text)?)?;
            }
            other => {
                return Err(Error::new(ErrorKind::Format)
                    .with_message(format!("unrecognized ModelType '{other}'")));
            }
        }
        if map.len() - offset != count {
            return Err(Error::new(ErrorKind::Format).with_message(format!(
                "brain model {structure} declares {count} indices but lists {}",
                map.len() - offset
            )));
        }
    }
    Ok(map)
}

fn brain_models_children(mut element: Element, map: &BrainModelsMap) -> Element {
    if let Some(space) = map.volume_space() {
        element = element.child(volume_element(space));
    }
    for model in map.models() {
        let base = Element::new("BrainModel")
            .attr("IndexOffset", model.offset())
            .attr("IndexCount", model.count())
            .attr("BrainStructure", model.structure().cifti_name());
        let child = match model.kind() {
            ModelKind::Surface {
                number_of_vertices,
                vertices,
            } => base
                .attr("ModelType", "CIFTI_MODEL_TYPE_SURFACE")
                .attr("SurfaceNumberOfVertices", number_of_vertices)
                .child(Element::new("VertexIndices").text(join_numbers(vertices.iter()))),
            ModelKind::Voxels { voxels } => base
                .attr("ModelType", "CIFTI_MODEL_TYPE_VOXELS")
                .child(Element::new("VoxelIndicesIJK").text(ijk_text(voxels.iter().copied()))),
        };
        element = element.child(child);
    }
    element
}

fn parse_parcels(element: &Element) -> Result<ParcelsMap, Error> {
    let mut map = ParcelsMap::new();
    if let Some(volume) = element.first_child("Volume") {
        map.set_volume_space(parse_volume(volume)?)?;
    }
    for surface in element.children_named("Surface") {
        let structure: Structure = surface.required("BrainStructure")?.parse()?;
        let count: i64 = parse_num(surface.required("SurfaceNumberOfVertices")?, "SurfaceNumberOfVertices")?;
        map.add_surface(structure, count)?;
    }
    for element in element.children_named("Parcel") {
        let mut parcel = Parcel::new(element.required("Name")?);
        for vertices in element.children_named("Vertices") {
            let structure: Structure = vertices.required("BrainStructure")?.parse()?;
            if parcel.vertices.contains_key(&structure) {
                return Err(Error::new(ErrorKind::Format).with_message(format!(
                    "parcel '{}' lists {structure} twice",
                    parcel.name
                )));
            }
            let list: Vec<i64> = parse_list(&vertices.text, "vertex index")?;
            parcel = parcel.with_vertices(structure, list);
        }
        if let Some(voxels) = element.first_child("VoxelIndicesIJK") {
            parcel = parcel.with_voxels(parse_ijk_list(&voxels.text)?);
        }
        map.add_parcel(parcel)?;
    }
    Ok(map)
}

fn parcels_children(mut element: Element, map: &ParcelsMap) -> Element {
    if let Some(space) = map.volume_space() {
        element = element.child(volume_element(space));
    }
    for (structure, count) in map.surfaces() {
        element = element.child(
            Element::new("Surface")
                .attr("BrainStructure", structure.cifti_name())
                .attr("SurfaceNumberOfVertices", count),
        );
    }
    for parcel in map.parcels() {
        let mut child = Element::new("Parcel").attr("Name", &parcel.name);
        for (structure, vertices) in &parcel.vertices {
            child = child.child(
                Element::new("Vertices")
                    .attr("BrainStructure", structure.cifti_name())
                    .text(join_numbers(vertices.iter())),
            );
        }
        if !parcel.voxels.is_empty() {
            child = child.child(
                Element::new("VoxelIndicesIJK").text(ijk_text(parcel.voxels.iter().copied())),
            );
        }
        element = element.child(child);
    }
    element
}

fn parse_named_map(element: &Element) -> Result<NamedMap, Error> {
    let name = element
        .first_child("MapName")
        .map(|name| name.text.clone())
        .unwrap_or_default();
    let metadata = match element.first_child("MetaData") {
        Some(metadata) => parse_metadata(metadata)?,
        None => BTreeMap::new(),
    };
    Ok(NamedMap { name, metadata })
}

fn named_map_element(map: &NamedMap, table: Option<Element>) -> Element {
    let mut element = Element::new("NamedMap");
    if !map.metadata.is_empty() {
        element = element.child(metadata_element(&map.metadata));
    }
    element = element.child(Element::new("MapName").text(map.name.clone()));
    if let Some(table) = table {
        element = element.child(table);
    }
    element
}

fn parse_scalars(element: &Element) -> Result<ScalarsMap, Error> {
    let maps = element
        .children_named("NamedMap")
        .map(parse_named_map)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ScalarsMap::new(maps))
}

fn parse_labels(element: &Element) -> Result<LabelsMap, Error> {
    let mut maps = Vec::new();
    for named in element.children_named("NamedMap") {
        let NamedMap { name, metadata } = parse_named_map(named)?;
        let mut table = LabelTable::new();
        if let Some(table_element) = named.first_child("LabelTable") {
            for label in table_element.children_named("Label") {
                let key: i32 = parse_num(label.required("Key")?, "label key")?;
                let mut rgba = [0.0f32; 4];
                for (slot, channel) in rgba.iter_mut().zip(["Red", "Green", "Blue", "Alpha"]) {
                    *slot = match label.attribute(channel) {
                        Some(value) => parse_num(value, channel)?,
                        None => 0.0,
                    };
                }
                table.insert(key, Label::new(label.text.clone(), rgba))?;
            }
        }
        table.ensure_unassigned();
        maps.push(NamedLabelMap {
            name,
            metadata,
            table,
        });
    }
    Ok(LabelsMap::new(maps))
}

fn label_map_element(map: &NamedLabelMap) -> Element {
    let table = map.table.iter().fold(Element::new("LabelTable"), |parent, (key, label)| {
        let [red, green, blue, alpha] = label.rgba;
        parent.child(
            Element::new("Label")
                .attr("Key", key)
                .attr("Red", red)
                .attr("Green", green)
                .attr("Blue", blue)
                .attr("Alpha", alpha)
                .text(label.name.clone()),
        )
    });
    let named = NamedMap {
        name: map.name.clone(),
        metadata: map.metadata.clone(),
    };
    named_map_element(&named, Some(table))
}

fn parse_series(element: &Element) -> Result<SeriesMap, Error> {
    let length: usize = parse_num(element.required("NumberOfSeriesPoints")?, "NumberOfSeriesPoints")?;
    let start: f64 = parse_num(element.required("SeriesStart")?, "SeriesStart")?;
    let step: f64 = parse_num(element.required("SeriesStep")?, "SeriesStep")?;
    let exponent: i32 = match element.attribute("SeriesExponent") {
        Some(value) => parse_num(value, "SeriesExponent")?,
        None => 0,
    };
    let unit = element.required("SeriesUnit")?.parse()?;
    Ok(SeriesMap {
        length,
        start,
        step,
        exponent,
        unit,
    })
}

#[cfg(test)]
mod tests {
    use super::{parse, write};
    use crate::core::error::ErrorKind;
    use crate::mapping::brain_models::BrainModelsMap;
    use crate::mapping::labels::{Label, LabelTable, LabelsMap, NamedLabelMap};
    use crate::mapping::named::{NamedMap, ScalarsMap, SeriesMap, SeriesUnit};
    use crate::mapping::parcels::{Parcel, ParcelsMap};
    use crate::mapping::structure::Structure;
    use crate::mapping::volume::VolumeSpace;
    use crate::mapping::{Axis, CiftiXml, IndexMap};

    fn dense() -> BrainModelsMap {
        let mut map = BrainModelsMap::new();
        map.add_surface_model(Structure::CortexLeft, 6, Some(&[0, 1, 3]))
            .expect("left");
        let sform = [[2.0, 0.0, 0.0, -90.0], [0.0, 2.0, 0.0, -126.0], [0.0, 0.0, 2.0, -72.0]];
        map.set_volume_space(VolumeSpace::new([4, 4, 4], sform).expect("space"))
            .expect("space");
        map.add_volume_model(Structure::ThalamusRight, &[[1, 1, 1], [2, 1, 1]])
            .expect("thalamus");
        map
    }

    #[test]
    fn dense_series_round_trips() {
        let mut xml = CiftiXml::new(
            IndexMap::BrainModels(dense()),
            IndexMap::Series(SeriesMap::new(3, 0.0, 0.72, SeriesUnit::Second)),
        )
        .expect("xml");
        xml.metadata_mut()
            .insert("Provenance".to_string(), "a < b & c".to_string());
        let text = write(&xml).expect("write");
        assert!(text.contains("AppliesToMatrixDimension=\"1\""));
        assert!(text.contains("CIFTI_INDEX_TYPE_SERIES"));
        let parsed = parse(&text).expect("parse");
        assert_eq!(parsed, xml);
    }

    #[test]
    fn identical_maps_share_one_element() {
        let xml = CiftiXml::new(IndexMap::BrainModels(dense()), IndexMap::BrainModels(dense()))
            .expect("xml");
        let text = write(&xml).expect("write");
        assert_eq!(text.matches("<MatrixIndicesMap").count(), 1);
        assert!(text.contains("AppliesToMatrixDimension=\"0,1\""));
        assert_eq!(parse(&text).expect("parse"), xml);
    }

    #[test]
    fn parcels_labels_and_scalars_round_trip() {
        let mut parcels = ParcelsMap::new();
        parcels.add_surface(Structure::CortexRight, 8).expect("surface");
        parcels
            .add_parcel(Parcel::new("v1").with_vertices(Structure::CortexRight, [1, 2]))
            .expect("v1");
        let mut table = LabelTable::with_unassigned();
        table
            .insert(4, Label::new("visual", [0.25, 0.5, 1.0, 1.0]))
            .expect("label");
        let labels = LabelsMap::new(vec![NamedLabelMap::new("atlas", table)]);
        let xml = CiftiXml::new(IndexMap::Parcels(parcels.clone()), IndexMap::Labels(labels))
            .expect("xml");
        assert_eq!(parse(&write(&xml).expect("write")).expect("parse"), xml);

        let mut named = NamedMap::new("thickness");
        named.metadata.insert("Units".to_string(), "mm".to_string());
        let scalars = CiftiXml::new(
            IndexMap::Parcels(parcels),
            IndexMap::Scalars(ScalarsMap::new(vec![named])),
        )
        .expect("xml");
        let parsed = parse(&write(&scalars).expect("write")).expect("parse");
        assert_eq!(parsed.scalars(Axis::Columns).expect("scalars").maps()[0].metadata["Units"], "mm");
    }

    #[test]
    fn foreign_xml_parses() {
        let text = r#"<?xml version="1.0" encoding="UTF-8"?>
<CIFTI Version="2">
  <Matrix>
    <MatrixIndicesMap AppliesToMatrixDimension="0" IndicesMapToDataType="CIFTI_INDEX_TYPE_SCALARS">
      <NamedMap><MapName>sulc</MapName></NamedMap>
    </MatrixIndicesMap>
    <MatrixIndicesMap AppliesToMatrixDimension="1" IndicesMapToDataType="CIFTI_INDEX_TYPE_BRAIN_MODELS">
      <BrainModel IndexOffset="0" IndexCount="2" ModelType="CIFTI_MODEL_TYPE_SURFACE"
                  BrainStructure="CIFTI_STRUCTURE_CORTEX_LEFT" SurfaceNumberOfVertices="4">
        <VertexIndices>0 2</VertexIndices>
      </BrainModel>
    </MatrixIndicesMap>
  </Matrix>
</CIFTI>"#;
        let xml = parse(text).expect("parse");
        assert_eq!(xml.number_of_rows(), 2);
        assert_eq!(xml.number_of_columns(), 1);
        let models = xml.brain_models(Axis::Rows).expect("models");
        assert_eq!(models.index_for_vertex(Structure::CortexLeft, 2), Some(1));
        assert_eq!(xml.scalars(Axis::Columns).expect("scalars").maps()[0].name, "sulc");
    }

    #[test]
    fn malformed_documents_are_rejected() {
        let cases = [
            "<CIFTI Version=\"1.0\"><Matrix/></CIFTI>",
            "<CIFTI Version=\"2\"><Matrix></Matrix></CIFTI>",
            "<CIFTI Version=\"2\"><Matrix>",
            "<NIFTI/>",
            r#"<CIFTI Version="2"><Matrix>
              <MatrixIndicesMap AppliesToMatrixDimension="0,1" IndicesMapToDataType="CIFTI_INDEX_TYPE_BRAIN_MODELS">
                <BrainModel IndexOffset="0" IndexCount="3" ModelType="CIFTI_MODEL_TYPE_SURFACE"
                  BrainStructure="CIFTI_STRUCTURE_CORTEX_LEFT" SurfaceNumberOfVertices="4">
                  <VertexIndices>0 2</VertexIndices>
                </BrainModel>
              </MatrixIndicesMap></Matrix></CIFTI>"#,
        ];
        for text in cases {
            let err = parse(text).expect_err(text);
            assert_eq!(err.kind(), ErrorKind::Format, "{text}");
        }
    }

    fn dense_document(volume: &str, vertex_count: &str) -> String {
        format!(
            r#"<CIFTI Version="2"><Matrix>
              <MatrixIndicesMap AppliesToMatrixDimension="0,1" IndicesMapToDataType="CIFTI_INDEX_TYPE_BRAIN_MODELS">
                {volume}
                <BrainModel IndexOffset="0" IndexCount="1" ModelType="CIFTI_MODEL_TYPE_SURFACE"
                  BrainStructure="CIFTI_STRUCTURE_CORTEX_LEFT" SurfaceNumberOfVertices="{vertex_count}">
                  <VertexIndices>0</VertexIndices>
                </BrainModel>
              </MatrixIndicesMap></Matrix></CIFTI>"#
        )
    }

    fn volume(dims: &str, exponent: &str) -> String {
        format!(
            r#"<Volume VolumeDimensions="{dims}">
              <TransformationMatrixVoxelIndicesIJKtoXYZ MeterExponent="{exponent}">
                1 0 0 0 0 1 0 0 0 0 1 0 0 0 0 1
              </TransformationMatrixVoxelIndicesIJKtoXYZ></Volume>"#
        )
    }

    #[test]
    fn oversized_counts_and_exponents_are_format_errors() {
        let parcels = r#"<CIFTI Version="2"><Matrix>
              <MatrixIndicesMap AppliesToMatrixDimension="0,1" IndicesMapToDataType="CIFTI_INDEX_TYPE_PARCELS">
                <Surface BrainStructure="CIFTI_STRUCTURE_CORTEX_LEFT" SurfaceNumberOfVertices="9223372036854775807"/>
                <Parcel Name="p"><Vertices BrainStructure="CIFTI_STRUCTURE_CORTEX_LEFT">0</Vertices></Parcel>
              </MatrixIndicesMap></Matrix></CIFTI>"#
            .to_string();
        let cases = [
            dense_document("", "9223372036854775807"),
            dense_document("", &(crate::mapping::MAX_SURFACE_VERTICES + 1).to_string()),
            dense_document(&volume("4194304,4194304,4194304", "-3"), "4"),
            dense_document(&volume("2,2,2", &i32::MAX.to_string()), "4"),
            dense_document(&volume("2,2,2", "-400"), "4"),
            parcels,
        ];
        for text in &cases {
            let err = parse(text).expect_err(text);
            assert_eq!(err.kind(), ErrorKind::Format, "{text}");
        }

        let sane = parse(&dense_document(&volume("2,2,2", "-3"), "4")).expect("sane document");
        let models = sane.brain_models(Axis::Rows).expect("models");
        assert_eq!(models.volume_space().expect("space").voxel_count(), 8);
        assert_eq!(models.surface_number_of_vertices(Structure::CortexLeft), Some(4));
    }
}
