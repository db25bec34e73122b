use serde_yaml::Value;

use iidy::{codec, transform_str, IidyError, LoadedImport, Loader};

struct MemLoader(Vec<(&'static str, &'static str)>);

impl Loader for MemLoader {
    fn load(&mut self, location: &str, _base: &str) -> Result<LoadedImport, IidyError> {
        let data = self
            .0
            .iter()
            .find(|(loc, _)| *loc == location)
            .map(|(_, data)| *data)
            .ok_or_else(|| IidyError::Import(format!("no such location '{location}'")))?;
        Ok(LoadedImport {
            import_type: "file".to_string(),
            resolved_location: location.to_string(),
            data: data.to_string(),
            doc: codec::parse(data, location)?,
        })
    }
}

fn no_imports() -> MemLoader {
    MemLoader(Vec::new())
}

fn get<'a>(doc: &'a Value, path: &[&str]) -> &'a Value {
    let mut current = doc;
    for segment in path {
        let Value::Mapping(map) = current else {
            panic!("expected mapping while walking {path:?}");
        };
        current = map
            .get(&Value::String(segment.to_string()))
            .unwrap_or_else(|| panic!("missing key '{segment}' while walking {path:?}"));
    }
    current
}

const QUEUE_TEMPLATE: &str = concat!(
    "$defs:\n",
    "  Queue:\n",
    "    $params:\n",
    "      - Name: Visibility\n",
    "        Default: 30\n",
    "      - Name: FullName\n",
    "        Default: '{{Prefix}}-queue'\n",
    "    Resources:\n",
    "      Main:\n",
    "        Type: 'AWS::SQS::Queue'\n",
    "        Properties:\n",
    "          QueueName: '{{FullName}}'\n",
    "          VisibilityTimeout: '{{Visibility}}'\n",
    "      Alarm:\n",
    "        Type: 'AWS::CloudWatch::Alarm'\n",
    "        Properties:\n",
    "          Target: !Ref Main\n",
    "    Outputs:\n",
    "      Url:\n",
    "        Value: !Ref Main\n",
);

#[test]
fn expansion_uses_the_resource_name_as_default_prefix() {
    let doc = format!("{QUEUE_TEMPLATE}Resources:\n  Jobs:\n    Type: Queue\n");
    let out = transform_str(&doc, "root.yaml", &mut no_imports()).unwrap();

    assert_eq!(
        get(&out, &["Resources", "JobsMain", "Properties", "QueueName"]),
        &Value::String("Jobs-queue".to_string())
    );
    assert_eq!(
        get(&out, &["Resources", "JobsMain", "Properties", "VisibilityTimeout"]),
        &Value::String("30".to_string())
    );
}

#[test]
fn refs_inside_templates_gain_the_expansion_prefix() {
    let doc = format!(
        "{QUEUE_TEMPLATE}Resources:\n  Jobs:\n    Type: Queue\n    NamePrefix: Work\n"
    );
    let out = transform_str(&doc, "root.yaml", &mut no_imports()).unwrap();

    let target = get(&out, &["Resources", "WorkAlarm", "Properties", "Target"]);
    let Value::Tagged(tagged) = target else {
        panic!("expected a tagged Ref, got {target:?}");
    };
    assert_eq!(tagged.value, Value::String("WorkMain".to_string()));
}

#[test]
fn template_sections_hoist_into_the_root_with_prefixes() {
    let doc = format!(
        "{QUEUE_TEMPLATE}Resources:\n  Jobs:\n    Type: Queue\n  Mail:\n    Type: Queue\n"
    );
    let out = transform_str(&doc, "root.yaml", &mut no_imports()).unwrap();

    let jobs_url = get(&out, &["Outputs", "JobsUrl", "Value"]);
    let Value::Tagged(tagged) = jobs_url else {
        panic!("expected a tagged Ref");
    };
    assert_eq!(tagged.value, Value::String("JobsMain".to_string()));
    assert!(matches!(get(&out, &["Outputs", "MailUrl"]), Value::Mapping(_)));
}

#[test]
fn overrides_are_evaluated_in_the_callers_scope() {
    let doc = format!(
        concat!(
            "{}",
            "Resources:\n",
            "  Jobs:\n",
            "    Type: Queue\n",
            "    Overrides:\n",
            "      Resources:\n",
            "        Main:\n",
            "          Properties:\n",
            "            Tag: '{{{{owner}}}}'\n",
        ),
        QUEUE_TEMPLATE
    );
    // `owner` is a root-level def, not a template binding.
    let doc = doc.replace("$defs:\n  Queue:", "$defs:\n  owner: platform\n  Queue:");
    let out = transform_str(&doc, "root.yaml", &mut no_imports()).unwrap();

    assert_eq!(
        get(&out, &["Resources", "JobsMain", "Properties", "Tag"]),
        &Value::String("platform".to_string())
    );
    // Merged over the template, not replacing it.
    assert_eq!(
        get(&out, &["Resources", "JobsMain", "Properties", "QueueName"]),
        &Value::String("Jobs-queue".to_string())
    );
}

#[test]
fn imported_templates_use_their_own_defs() {
    let mut loader = MemLoader(vec![(
        "service.yaml",
        concat!(
            "$defs:\n",
            "  image: registry/app:v1\n",
            "$params:\n",
            "  - Name: Cpu\n",
            "Resources:\n",
            "  Task:\n",
            "    Type: 'AWS::ECS::TaskDefinition'\n",
            "    Properties:\n",
            "      Image: '{{image}}'\n",
            "      Cpu: '{{Cpu}}'\n",
        ),
    )]);
    let out = transform_str(
        concat!(
            "$imports:\n",
            "  Service: service.yaml\n",
            "Resources:\n",
            "  Web:\n",
            "    Type: Service\n",
            "    Properties:\n",
            "      Cpu: 256\n",
        ),
        "root.yaml",
        &mut loader,
    )
    .unwrap();

    assert_eq!(
        get(&out, &["Resources", "WebTask", "Properties", "Image"]),
        &Value::String("registry/app:v1".to_string())
    );
    assert_eq!(
        get(&out, &["Resources", "WebTask", "Properties", "Cpu"]),
        &Value::String("256".to_string())
    );
}

#[test]
fn missing_required_parameter_fails_the_transform() {
    let mut loader = MemLoader(vec![(
        "service.yaml",
        "$params:\n  - Name: Cpu\nResources:\n  Task:\n    Type: 'AWS::ECS::TaskDefinition'\n",
    )]);
    let err = transform_str(
        "$imports:\n  Service: service.yaml\nResources:\n  Web:\n    Type: Service\n",
        "root.yaml",
        &mut loader,
    )
    .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("missing required parameter 'Cpu'"));
    assert!(message.contains("$.Resources.Web"));
}

#[test]
fn unknown_resource_type_is_rejected() {
    let err = transform_str(
        "Resources:\n  Web:\n    Type: Bogus\n",
        "root.yaml",
        &mut no_imports(),
    )
    .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("invalid resource type 'Bogus'"));
    assert!(message.contains("$.Resources.Web"));
}

#[test]
fn native_and_custom_resources_evaluate_in_place() {
    let out = transform_str(
        concat!(
            "$defs:\n",
            "  stage: prod\n",
            "Resources:\n",
            "  Bucket:\n",
            "    Type: 'AWS::S3::Bucket'\n",
            "    Properties:\n",
            "      BucketName: 'assets-{{stage}}'\n",
            "  Hook:\n",
            "    Type: 'Custom::Notifier'\n",
        ),
        "root.yaml",
        &mut no_imports(),
    )
    .unwrap();

    assert_eq!(
        get(&out, &["Resources", "Bucket", "Properties", "BucketName"]),
        &Value::String("assets-prod".to_string())
    );
    assert_eq!(
        get(&out, &["Resources", "Hook", "Type"]),
        &Value::String("Custom::Notifier".to_string())
    );
}

#[test]
fn pattern_validated_parameters_report_failures() {
    let doc = concat!(
        "$defs:\n",
        "  Net:\n",
        "    $params:\n",
        "      - Name: Cidr\n",
        "        AllowedPattern: '^10\\.'\n",
        "    Resources:\n",
        "      Vpc:\n",
        "        Type: 'AWS::EC2::VPC'\n",
        "Resources:\n",
        "  Core:\n",
        "    Type: Net\n",
        "    Properties:\n",
        "      Cidr: 192.168.0.0/16\n",
    );
    let err = transform_str(doc, "root.yaml", &mut no_imports()).unwrap_err();
    assert!(err.to_string().contains("does not match AllowedPattern"));
}

#[test]
fn schema_validated_parameters_report_failures() {
    let doc = concat!(
        "$defs:\n",
        "  Pool:\n",
        "    $params:\n",
        "      - Name: Size\n",
        "        Schema: {type: integer, minimum: 1}\n",
        "    Resources:\n",
        "      Asg:\n",
        "        Type: 'AWS::AutoScaling::AutoScalingGroup'\n",
        "Resources:\n",
        "  Workers:\n",
        "    Type: Pool\n",
        "    Properties:\n",
        "      Size: zero\n",
    );
    let err = transform_str(doc, "root.yaml", &mut no_imports()).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("parameter 'Size'"));
    assert!(message.contains("$.Resources.Workers"));
}

#[test]
fn colliding_expanded_resource_names_are_rejected() {
    let doc = concat!(
        "$defs:\n",
        "  T:\n",
        "    $params:\n",
        "      - Name: N\n",
        "        Default: x\n",
        "    Resources:\n",
        "      Main:\n",
        "        Type: 'AWS::SNS::Topic'\n",
        "Resources:\n",
        "  A:\n",
        "    Type: T\n",
        "    NamePrefix: Same\n",
        "  B:\n",
        "    Type: T\n",
        "    NamePrefix: Same\n",
    );
    let err = transform_str(doc, "root.yaml", &mut no_imports()).unwrap_err();
    assert!(err.to_string().contains("merge conflict"));
}

#[test]
fn native_resources_cannot_overwrite_expanded_ones() {
    let doc = concat!(
        "$defs:\n",
        "  T:\n",
        "    $params: []\n",
        "    Resources:\n",
        "      Foo:\n",
        "        Type: 'AWS::X'\n",
        "Resources:\n",
        "  A:\n",
        "    Type: T\n",
        "    NamePrefix: ''\n",
        "  Foo:\n",
        "    Type: 'AWS::Y'\n",
    );
    let err = transform_str(doc, "root.yaml", &mut no_imports()).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("merge conflict"));
    assert!(message.contains("'Foo'"));
}

#[test]
fn expand_macro_builds_data_from_a_template() {
    let out = transform_str(
        concat!(
            "$defs:\n",
            "  Snippet:\n",
            "    $params:\n",
            "      - Name: Host\n",
            "    Endpoint:\n",
            "      Url: 'https://{{Host}}/api'\n",
            "X: !$expand {template: Snippet, params: {Host: example.com}}\n",
        ),
        "root.yaml",
        &mut no_imports(),
    )
    .unwrap();

    assert_eq!(
        get(&out, &["X", "Endpoint", "Url"]),
        &Value::String("https://example.com/api".to_string())
    );
}
