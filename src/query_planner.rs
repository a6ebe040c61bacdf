use async_trait::async_trait;
use graphql_parser::query::{
    Definition, Directive, Field, FragmentDefinition, OperationDefinition, Selection as AstSelection,
    SelectionSet, TypeCondition, Value as AstValue, VariableDefinition, parse_query,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::resolver::{InputValue, ResolveBinding};
use crate::schema_builder::{ArgumentDef, ArgumentType, FederatedSchema, ObjectType, OutputNode, PeerField, ScalarType};
use crate::{GraphQLRequest, OperationCategory, QueryError};

const QUERY_TYPE: &str = "Query";

/// A validated sub-field request inside a class field.
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    pub name: String,
    pub alias: Option<String>,
    pub kind: SelectionKind,
}

impl Selection {
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SelectionKind {
    Leaf { scalar: ScalarType, list: bool },
    Object(Vec<Selection>),
    /// Per-target selections of a reference, keyed by class name.
    Fragments(Vec<(String, Vec<Selection>)>),
}

/// One class field of the query bound to its peer.
#[derive(Clone, Debug)]
pub struct Invocation {
    /// Response keys from the root down to the class field.
    pub path: Vec<String>,
    pub binding: ResolveBinding,
    pub arguments: BTreeMap<String, InputValue>,
    pub selections: Vec<Selection>,
}

#[derive(Debug, Default)]
pub struct QueryPlan {
    pub invocations: Vec<Invocation>,
}

#[async_trait]
pub trait QueryPlanner: Send + Sync {
    async fn plan_query(&self, request: &GraphQLRequest, schema: &FederatedSchema) -> Result<QueryPlan, QueryError>;
}

pub struct SimpleQueryPlanner;

impl SimpleQueryPlanner {
    pub fn new() -> Self {
        SimpleQueryPlanner
    }

    fn plan(&self, request: &GraphQLRequest, schema: &FederatedSchema) -> Result<QueryPlan, QueryError> {
        let document = parse_query::<String>(&request.query).map_err(|e| QueryError::Parse(e.to_string()))?;

        let mut operations = Vec::new();
        let mut fragments = HashMap::new();
        for definition in &document.definitions {
            match definition {
                Definition::Operation(op) => operations.push(op),
                Definition::Fragment(fragment) => {
                    fragments.insert(fragment.name.as_str(), fragment);
                }
            }
        }

        let (selection_set, variable_definitions) =
            select_operation(&operations, request.operation_name.as_deref())?;
        let variables = collect_variables(request.variables.as_ref(), variable_definitions)?;
        let walker = Walker { fragments, variables };

        let mut invocations: Vec<Invocation> = Vec::new();
        let mut namespaces = HashMap::new();
        let mut visiting = Vec::new();
        for root in walker.fields(selection_set, QUERY_TYPE, None, &mut visiting)? {
            let surface = OperationCategory::from_root_field(&root.name)
                .and_then(|category| schema.surface(category))
                .ok_or_else(|| unknown_field(QUERY_TYPE, &root.name))?;
            walker.namespace_field(root, &surface.type_name)?;
            let root_path = vec![response_key(root).to_string()];
            claim_namespace(&mut namespaces, &root_path, &root.name)?;

            for peer_selection in walker.fields(&root.selection_set, &surface.type_name, None, &mut visiting)? {
                let peer = surface
                    .peer(&peer_selection.name)
                    .ok_or_else(|| unknown_field(&surface.type_name, &peer_selection.name))?;
                walker.namespace_field(peer_selection, &peer.type_name)?;
                let mut peer_path = root_path.clone();
                peer_path.push(response_key(peer_selection).to_string());
                claim_namespace(&mut namespaces, &peer_path, &peer_selection.name)?;

                for kind_selection in walker.fields(&peer_selection.selection_set, &peer.type_name, None, &mut visiting)? {
                    let kind = peer
                        .kind(&kind_selection.name)
                        .ok_or_else(|| unknown_field(&peer.type_name, &kind_selection.name))?;
                    walker.namespace_field(kind_selection, &kind.type_name)?;
                    let mut kind_path = peer_path.clone();
                    kind_path.push(response_key(kind_selection).to_string());
                    claim_namespace(&mut namespaces, &kind_path, &kind_selection.name)?;

                    for class_selection in walker.fields(&kind_selection.selection_set, &kind.type_name, None, &mut visiting)? {
                        let class = kind
                            .class(&class_selection.name)
                            .ok_or_else(|| unknown_field(&kind.type_name, &class_selection.name))?;
                        walker.require_selection(class_selection, &class.object.name)?;

                        let arguments = walker.arguments(class_selection, &class.arguments)?;
                        let selections = walker.selections(
                            &class_selection.selection_set,
                            &class.object,
                            Some(&class.name),
                            peer,
                            &mut visiting,
                        )?;

                        let mut path = kind_path.clone();
                        path.push(response_key(class_selection).to_string());

                        // One response key is one resolver call: repeated
                        // selections of the same field are merged.
                        match invocations.iter_mut().find(|invocation| invocation.path == path) {
                            Some(existing) => {
                                if existing.binding != class.binding || existing.arguments != arguments {
                                    return Err(QueryError::FieldConflict {
                                        response_key: response_key(class_selection).to_string(),
                                        reason: format!(
                                            "{} is selected with different classes or arguments",
                                            response_key(class_selection)
                                        ),
                                    });
                                }
                                merge_selections(&mut existing.selections, selections)?;
                            }
                            None => invocations.push(Invocation {
                                path,
                                binding: class.binding.clone(),
                                arguments,
                                selections,
                            }),
                        }
                    }
                }
            }
        }

        if invocations.is_empty() {
            return Err(QueryError::Empty);
        }
        Ok(QueryPlan { invocations })
    }
}

impl Default for SimpleQueryPlanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryPlanner for SimpleQueryPlanner {
    async fn plan_query(&self, request: &GraphQLRequest, schema: &FederatedSchema) -> Result<QueryPlan, QueryError> {
        self.plan(request, schema)
    }
}

type OperationParts<'d, 'a> = (&'d SelectionSet<'a, String>, &'d [VariableDefinition<'a, String>]);

fn select_operation<'d, 'a>(
    operations: &[&'d OperationDefinition<'a, String>],
    operation_name: Option<&str>,
) -> Result<OperationParts<'d, 'a>, QueryError> {
    let operation: &'d OperationDefinition<'a, String> = match operation_name {
        Some(wanted) => *operations
            .iter()
            .find(|op| matches!(op, OperationDefinition::Query(q) if q.name.as_deref() == Some(wanted)))
            .ok_or_else(|| QueryError::UnknownOperation(wanted.to_string()))?,
        None => match operations {
            [] => return Err(QueryError::Empty),
            [single] => *single,
            _ => return Err(QueryError::AmbiguousOperation),
        },
    };

    match operation {
        OperationDefinition::SelectionSet(set) => Ok((set, &[])),
        OperationDefinition::Query(query) => Ok((&query.selection_set, &query.variable_definitions)),
        OperationDefinition::Mutation(_) | OperationDefinition::Subscription(_) => {
            Err(QueryError::UnsupportedOperation)
        }
    }
}

fn collect_variables(
    provided: Option<&Value>,
    definitions: &[VariableDefinition<'_, String>],
) -> Result<HashMap<String, InputValue>, QueryError> {
    let mut variables: HashMap<String, InputValue> = provided
        .and_then(Value::as_object)
        .map(|map| map.iter().map(|(k, v)| (k.clone(), json_to_input(v))).collect())
        .unwrap_or_default();

    for definition in definitions {
        if variables.contains_key(&definition.name) {
            continue;
        }
        if let Some(default) = &definition.default_value {
            let value = literal_to_input(default, &HashMap::new())?;
            variables.insert(definition.name.clone(), value);
        }
    }
    Ok(variables)
}

fn json_to_input(value: &Value) -> InputValue {
    match value {
        Value::Null => InputValue::Null,
        Value::Bool(b) => InputValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => InputValue::Int(i),
            None => InputValue::Float(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => InputValue::String(s.clone()),
        Value::Array(items) => InputValue::List(items.iter().map(json_to_input).collect()),
        Value::Object(map) => InputValue::Object(map.iter().map(|(k, v)| (k.clone(), json_to_input(v))).collect()),
    }
}

fn literal_to_input(value: &AstValue<'_, String>, variables: &HashMap<String, InputValue>) -> Result<InputValue, QueryError> {
    Ok(match value {
        AstValue::Variable(name) => variables
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::MissingVariable(name.clone()))?,
        AstValue::Int(n) => n
            .as_i64()
            .map(InputValue::Int)
            .ok_or_else(|| QueryError::Parse("integer literal out of range".to_string()))?,
        AstValue::Float(f) => InputValue::Float(*f),
        AstValue::String(s) => InputValue::String(s.clone()),
        AstValue::Boolean(b) => InputValue::Boolean(*b),
        AstValue::Null => InputValue::Null,
        AstValue::Enum(e) => InputValue::Enum(e.clone()),
        AstValue::List(items) => InputValue::List(
            items
                .iter()
                .map(|item| literal_to_input(item, variables))
                .collect::<Result<_, _>>()?,
        ),
        AstValue::Object(fields) => InputValue::Object(
            fields
                .iter()
                .map(|(k, v)| literal_to_input(v, variables).map(|v| (k.clone(), v)))
                .collect::<Result<_, _>>()?,
        ),
    })
}

fn response_key<'d>(field: &'d Field<'_, String>) -> &'d str {
    field.alias.as_deref().unwrap_or(&field.name)
}

fn unknown_field(type_name: &str, field: &str) -> QueryError {
    QueryError::UnknownField {
        type_name: type_name.to_string(),
        field: field.to_string(),
    }
}

struct Walker<'d, 'a> {
    fragments: HashMap<&'d str, &'d FragmentDefinition<'a, String>>,
    variables: HashMap<String, InputValue>,
}

impl<'d, 'a> Walker<'d, 'a> {
    /// Flattens fragments and applies `@skip`/`@include`, returning the
    /// fields selected on `type_name`.
    fn fields(
        &self,
        set: &'d SelectionSet<'a, String>,
        type_name: &str,
        class: Option<&str>,
        visiting: &mut Vec<&'d str>,
    ) -> Result<Vec<&'d Field<'a, String>>, QueryError> {
        let mut out = Vec::new();
        for item in &set.items {
            match item {
                AstSelection::Field(field) => {
                    if self.included(&field.directives)? {
                        out.push(field);
                    }
                }
                AstSelection::InlineFragment(fragment) => {
                    if !self.included(&fragment.directives)? {
                        continue;
                    }
                    if let Some(TypeCondition::On(condition)) = &fragment.type_condition {
                        check_condition(type_name, class, condition)?;
                    }
                    out.extend(self.fields(&fragment.selection_set, type_name, class, visiting)?);
                }
                AstSelection::FragmentSpread(spread) => {
                    if !self.included(&spread.directives)? {
                        continue;
                    }
                    let fragment = self.enter_fragment(&spread.fragment_name, visiting)?;
                    let TypeCondition::On(condition) = &fragment.type_condition;
                    check_condition(type_name, class, condition)?;
                    let fields = self.fields(&fragment.selection_set, type_name, class, visiting);
                    visiting.pop();
                    out.extend(fields?);
                }
            }
        }
        Ok(out)
    }

    fn enter_fragment(
        &self,
        name: &str,
        visiting: &mut Vec<&'d str>,
    ) -> Result<&'d FragmentDefinition<'a, String>, QueryError> {
        let fragment = *self
            .fragments
            .get(name)
            .ok_or_else(|| QueryError::UnknownFragment(name.to_string()))?;
        if visiting.contains(&fragment.name.as_str()) {
            return Err(QueryError::FragmentCycle(name.to_string()));
        }
        visiting.push(fragment.name.as_str());
        Ok(fragment)
    }

    fn included(&self, directives: &[Directive<'a, String>]) -> Result<bool, QueryError> {
        for directive in directives {
            let expected = match directive.name.as_str() {
                "skip" => false,
                "include" => true,
                _ => continue,
            };
            let condition = directive
                .arguments
                .iter()
                .find(|(name, _)| name == "if")
                .map(|(_, value)| literal_to_input(value, &self.variables))
                .transpose()?;
            let Some(InputValue::Boolean(condition)) = condition else {
                return Err(QueryError::InvalidArgument {
                    field: format!("@{}", directive.name),
                    argument: "if".to_string(),
                    reason: "expected a boolean".to_string(),
                });
            };
            if condition != expected {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Namespace fields take no arguments and must select something.
    fn namespace_field(&self, field: &Field<'a, String>, type_name: &str) -> Result<(), QueryError> {
        if let Some((argument, _)) = field.arguments.first() {
            return Err(QueryError::UnknownArgument {
                field: field.name.clone(),
                argument: argument.clone(),
            });
        }
        self.require_selection(field, type_name)
    }

    fn require_selection(&self, field: &Field<'a, String>, type_name: &str) -> Result<(), QueryError> {
        if field.selection_set.items.is_empty() {
            return Err(QueryError::MissingSelection {
                type_name: type_name.to_string(),
                field: field.name.clone(),
            });
        }
        Ok(())
    }

    fn arguments(
        &self,
        field: &Field<'a, String>,
        definitions: &[ArgumentDef],
    ) -> Result<BTreeMap<String, InputValue>, QueryError> {
        let invalid = |argument: &str, reason: &str| QueryError::InvalidArgument {
            field: field.name.clone(),
            argument: argument.to_string(),
            reason: reason.to_string(),
        };

        let mut arguments = BTreeMap::new();
        for (name, value) in &field.arguments {
            let definition = definitions
                .iter()
                .find(|d| d.name == name.as_str())
                .ok_or_else(|| QueryError::UnknownArgument {
                    field: field.name.clone(),
                    argument: name.clone(),
                })?;

            let value = match literal_to_input(value, &self.variables)? {
                InputValue::Null => continue,
                value => value,
            };
            let value = match (definition.ty, value) {
                (ArgumentType::Int, value @ InputValue::Int(_)) => value,
                (ArgumentType::Object, value @ InputValue::Object(_)) => value,
                // a single string is coerced to a one-element list
                (ArgumentType::StringList, InputValue::String(s)) => InputValue::List(vec![InputValue::String(s)]),
                (ArgumentType::StringList, InputValue::List(items))
                    if items.iter().all(|i| matches!(i, InputValue::String(_))) =>
                {
                    InputValue::List(items)
                }
                (ArgumentType::Int, _) => return Err(invalid(name, "expected an integer")),
                (ArgumentType::Object, _) => return Err(invalid(name, "expected an input object")),
                (ArgumentType::StringList, _) => return Err(invalid(name, "expected a list of strings")),
            };
            arguments.insert(name.clone(), value);
        }

        for definition in definitions.iter().filter(|d| d.required) {
            if !arguments.contains_key(definition.name) {
                return Err(QueryError::MissingArgument {
                    field: field.name.clone(),
                    argument: definition.name.to_string(),
                });
            }
        }
        Ok(arguments)
    }

    fn selections(
        &self,
        set: &'d SelectionSet<'a, String>,
        object: &ObjectType,
        class: Option<&str>,
        peer: &PeerField,
        visiting: &mut Vec<&'d str>,
    ) -> Result<Vec<Selection>, QueryError> {
        let mut out = Vec::new();
        for field in self.fields(set, &object.name, class, visiting)? {
            let output = object
                .field(&field.name)
                .ok_or_else(|| unknown_field(&object.name, &field.name))?;
            if let Some((argument, _)) = field.arguments.first() {
                return Err(QueryError::UnknownArgument {
                    field: field.name.clone(),
                    argument: argument.clone(),
                });
            }

            let has_selection = !field.selection_set.items.is_empty();
            let kind = match &output.node {
                OutputNode::Scalar(scalar) => {
                    if has_selection {
                        return Err(QueryError::UnexpectedSelection {
                            type_name: object.name.clone(),
                            field: field.name.clone(),
                        });
                    }
                    SelectionKind::Leaf {
                        scalar: *scalar,
                        list: output.list,
                    }
                }
                OutputNode::Object(child) | OutputNode::Summary(child) => {
                    self.require_selection(field, &child.name)?;
                    SelectionKind::Object(self.selections(&field.selection_set, child, None, peer, visiting)?)
                }
                OutputNode::Reference(targets) => {
                    self.require_selection(field, &object.name)?;
                    SelectionKind::Fragments(self.reference_fragments(
                        &field.selection_set,
                        targets,
                        peer,
                        visiting,
                    )?)
                }
            };

            merge_selection(
                &mut out,
                Selection {
                    name: field.name.clone(),
                    alias: field.alias.clone(),
                    kind,
                },
            )?;
        }
        Ok(out)
    }

    /// References only accept typed fragments, one per target class.
    fn reference_fragments(
        &self,
        set: &'d SelectionSet<'a, String>,
        targets: &[String],
        peer: &PeerField,
        visiting: &mut Vec<&'d str>,
    ) -> Result<Vec<(String, Vec<Selection>)>, QueryError> {
        let reference_type = targets.join("|");
        let mut out = Vec::new();

        for item in &set.items {
            let (condition, selection_set, entered) = match item {
                AstSelection::InlineFragment(fragment) => {
                    if !self.included(&fragment.directives)? {
                        continue;
                    }
                    match &fragment.type_condition {
                        Some(TypeCondition::On(condition)) => (condition, &fragment.selection_set, false),
                        None => {
                            let nested = self.reference_fragments(&fragment.selection_set, targets, peer, visiting)?;
                            merge_fragments(&mut out, nested)?;
                            continue;
                        }
                    }
                }
                AstSelection::FragmentSpread(spread) => {
                    if !self.included(&spread.directives)? {
                        continue;
                    }
                    let fragment = self.enter_fragment(&spread.fragment_name, visiting)?;
                    let TypeCondition::On(condition) = &fragment.type_condition;
                    (condition, &fragment.selection_set, true)
                }
                AstSelection::Field(field) => return Err(unknown_field(&reference_type, &field.name)),
            };

            let result = if targets.contains(condition) {
                peer.class_object(condition)
                    .ok_or_else(|| unknown_field(&reference_type, condition))
                    .and_then(|object| self.selections(selection_set, object, Some(condition), peer, visiting))
            } else {
                Err(QueryError::InvalidFragmentType {
                    type_name: reference_type.clone(),
                    type_condition: condition.clone(),
                })
            };
            if entered {
                visiting.pop();
            }
            merge_fragments(&mut out, vec![(condition.clone(), result?)])?;
        }
        Ok(out)
    }
}

/// A fragment must name the type it is spread on. On a class object the
/// class name is accepted as well.
fn check_condition(type_name: &str, class: Option<&str>, condition: &str) -> Result<(), QueryError> {
    if condition == type_name || class == Some(condition) {
        Ok(())
    } else {
        Err(QueryError::InvalidFragmentType {
            type_name: type_name.to_string(),
            type_condition: condition.to_string(),
        })
    }
}

fn field_conflict(response_key: &str, reason: String) -> QueryError {
    QueryError::FieldConflict {
        response_key: response_key.to_string(),
        reason,
    }
}

/// Records the field a namespace response key stands for.
fn claim_namespace(
    claimed: &mut HashMap<Vec<String>, String>,
    path: &[String],
    field: &str,
) -> Result<(), QueryError> {
    match claimed.get(path) {
        Some(existing) if existing != field => Err(field_conflict(
            path.last().map(String::as_str).unwrap_or_default(),
            format!("{} and {} are different fields", existing, field),
        )),
        Some(_) => Ok(()),
        None => {
            claimed.insert(path.to_vec(), field.to_string());
            Ok(())
        }
    }
}

fn merge_selections(into: &mut Vec<Selection>, incoming: Vec<Selection>) -> Result<(), QueryError> {
    for selection in incoming {
        merge_selection(into, selection)?;
    }
    Ok(())
}

/// Adds `selection` to `into`, merging it with an earlier selection under
/// the same response key. Sub-fields take no arguments, so two selections
/// of the same field always merge.
fn merge_selection(into: &mut Vec<Selection>, selection: Selection) -> Result<(), QueryError> {
    let Some(index) = into
        .iter()
        .position(|s| s.response_key() == selection.response_key())
    else {
        into.push(selection);
        return Ok(());
    };
    let existing = &mut into[index];

    let key = selection.response_key().to_string();
    if existing.name != selection.name {
        return Err(field_conflict(
            &key,
            format!("{} and {} are different fields", existing.name, selection.name),
        ));
    }
    match (&mut existing.kind, selection.kind) {
        (SelectionKind::Leaf { .. }, SelectionKind::Leaf { .. }) => Ok(()),
        (SelectionKind::Object(children), SelectionKind::Object(incoming)) => merge_selections(children, incoming),
        (SelectionKind::Fragments(fragments), SelectionKind::Fragments(incoming)) => merge_fragments(fragments, incoming),
        _ => Err(field_conflict(&key, format!("{} is selected with different shapes", existing.name))),
    }
}

fn merge_fragments(
    into: &mut Vec<(String, Vec<Selection>)>,
    incoming: Vec<(String, Vec<Selection>)>,
) -> Result<(), QueryError> {
    for (condition, selections) in incoming {
        match into.iter_mut().find(|(existing, _)| *existing == condition) {
            Some((_, children)) => merge_selections(children, selections)?,
            None => into.push((condition, selections)),
        }
    }
    Ok(())
}
