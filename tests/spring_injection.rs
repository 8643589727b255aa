// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

mod common;

use common::*;
use mscan::builder::spring_bean::FanOutPolicy;
use mscan::builder::spring_container::SpringContainerPlugin;
use mscan::ir::memory::MemoryProgram;
use mscan::ir::program::{ClassId, FieldId, MethodId, ProgramModel};
use mscan::pta::{CsObj, FlowKind, Plugin, Pointer, Solver};
use mscan::taint::TaintConfig;

const SERVICE: &str = "org.springframework.stereotype.Service";
const REPOSITORY: &str = "org.springframework.stereotype.Repository";
const AUTOWIRED: &str = "org.springframework.beans.factory.annotation.Autowired";
const QUALIFIER: &str = "org.springframework.beans.factory.annotation.Qualifier";
const PRIMARY: &str = "org.springframework.context.annotation.Primary";
const CONFIGURATION: &str = "org.springframework.context.annotation.Configuration";
const BEAN: &str = "org.springframework.context.annotation.Bean";

fn interface(program: &mut MemoryProgram, name: &str) -> ClassId {
    let class = program.add_class(name);
    program.class_mut(class).is_interface = true;
    class
}

fn bean_class(program: &mut MemoryProgram, name: &str, stereotype: &str, implements: Option<ClassId>) -> ClassId {
    let class = program.add_class(name);
    program.class_mut(class).annotations.push(annotation(stereotype));
    if let Some(api) = implements {
        program.class_mut(class).interfaces.push(api);
    }
    class
}

fn autowired_field(program: &mut MemoryProgram, holder: ClassId, name: &str, field_type: &str) -> FieldId {
    let field = program.add_field(holder, name, field_type);
    program.field_mut(field).annotations.push(annotation(AUTOWIRED));
    field
}

struct PaymentApp {
    program: MemoryProgram,
    checkout: ClassId,
    gateway_field: FieldId,
    alipay: ClassId,
    wechat: ClassId,
}

/// Two `PayGateway` implementations and a checkout service that injects one.
fn payment_app(primary_alipay: bool, qualifier: Option<&str>) -> PaymentApp {
    let mut program = MemoryProgram::new();
    let gateway = interface(&mut program, "com.foo.pay.PayGateway");
    let alipay = bean_class(&mut program, "com.foo.pay.Alipay", SERVICE, Some(gateway));
    let wechat = bean_class(&mut program, "com.foo.pay.WechatPay", SERVICE, Some(gateway));
    if primary_alipay {
        program.class_mut(alipay).annotations.push(annotation(PRIMARY));
    }
    let checkout = bean_class(&mut program, "com.foo.order.CheckoutService", SERVICE, None);
    let gateway_field = autowired_field(&mut program, checkout, "gateway", "com.foo.pay.PayGateway");
    if let Some(name) = qualifier {
        program
            .field_mut(gateway_field)
            .annotations
            .push(annotation(QUALIFIER).with_str("value", name));
    }
    PaymentApp {
        program,
        checkout,
        gateway_field,
        alipay,
        wechat,
    }
}

/// Runs the container and returns the bean objects wired into `checkout.gateway`, by class.
fn wired_gateway_classes(app: PaymentApp, policy: FanOutPolicy) -> Vec<ClassId> {
    let mut host = MockHost::new(app.program, session(vec![], TaintConfig::default()));
    let mut plugin = SpringContainerPlugin::new(policy);
    host.run(&mut plugin);

    let registry = plugin.registry();
    let checkout_obj = registry.by_name("checkoutService").map(|b| b.object()).unwrap();
    let mut classes: Vec<ClassId> = host
        .solver
        .field_points_to(cs_obj(checkout_obj), app.gateway_field)
        .into_iter()
        .filter_map(|o| registry.beans().iter().find(|b| b.object() == o.obj).map(|b| b.class()))
        .collect();
    classes.sort();
    assert!(registry.by_name("alipay").is_some());
    assert!(registry.by_name("wechatPay").is_some());
    assert!(registry.objects_of_class(app.checkout).len() == 1);
    classes
}

#[test]
fn single_candidate_is_wired() {
    let mut program = MemoryProgram::new();
    let repo = interface(&mut program, "com.foo.order.OrderRepository");
    let repo_impl = bean_class(&mut program, "com.foo.order.JdbcOrderRepository", REPOSITORY, Some(repo));
    let service = bean_class(&mut program, "com.foo.order.OrderService", SERVICE, None);
    let field = autowired_field(&mut program, service, "repository", "com.foo.order.OrderRepository");

    let mut host = MockHost::new(program, session(vec![], TaintConfig::default()));
    let mut plugin = SpringContainerPlugin::new(FanOutPolicy::All);
    host.run(&mut plugin);

    assert_eq!(plugin.registry().len(), 2);
    let service_obj = plugin.registry().objects_of_class(service)[0];
    let repo_obj = plugin.registry().objects_of_class(repo_impl)[0];
    assert_eq!(
        host.solver.field_points_to(cs_obj(service_obj), field),
        vec![cs_obj(repo_obj)]
    );
    assert_eq!(plugin.synthesized_edges(), 1);
    assert_eq!(host.solver.mock_objects("SpringBean").len(), 2);
}

#[test]
fn every_candidate_is_wired_by_default() {
    let app = payment_app(false, None);
    let expected = vec![app.alipay, app.wechat];
    assert_eq!(wired_gateway_classes(app, FanOutPolicy::All), expected);
}

#[test]
fn ambiguous_candidates_are_not_wired_when_diagnosing() {
    let app = payment_app(false, None);
    assert!(wired_gateway_classes(app, FanOutPolicy::Diagnose).is_empty());
}

#[test]
fn primary_candidate_wins() {
    for policy in [FanOutPolicy::All, FanOutPolicy::Diagnose] {
        let app = payment_app(true, None);
        let expected = vec![app.alipay];
        assert_eq!(wired_gateway_classes(app, policy), expected);
    }
}

#[test]
fn qualifier_selects_by_bean_name() {
    let app = payment_app(false, Some("wechatPay"));
    let expected = vec![app.wechat];
    assert_eq!(wired_gateway_classes(app, FanOutPolicy::Diagnose), expected);

    let app = payment_app(false, Some("unionPay"));
    assert!(wired_gateway_classes(app, FanOutPolicy::All).is_empty());
}

#[test]
fn constructor_parameters_are_injected() {
    let mut program = MemoryProgram::new();
    let repo = bean_class(&mut program, "com.foo.user.UserRepository", REPOSITORY, None);
    let service = bean_class(&mut program, "com.foo.user.UserService", SERVICE, None);
    let init = program.add_method(service, "<init>", &["com.foo.user.UserRepository"], "void");

    let mut host = MockHost::new(program, session(vec![], TaintConfig::default()));
    let mut plugin = SpringContainerPlugin::new(FanOutPolicy::All);
    host.run(&mut plugin);

    let repo_obj = plugin.registry().objects_of_class(repo)[0];
    let service_obj = plugin.registry().objects_of_class(service)[0];
    let param = host.program.method(init).params[0];
    assert_eq!(host.solver.var_points_to(param), vec![cs_obj(repo_obj)]);
    let entry = host.solver.entries.iter().find(|e| e.method == init).unwrap();
    assert_eq!(entry.this_obj, Some(service_obj));
    assert_eq!(plugin.num_entries(), 1);
}

#[test]
fn produced_beans_flow_from_the_producer() {
    let mut program = MemoryProgram::new();
    let client = program.add_class("com.foo.http.HttpClient");
    let config = bean_class(&mut program, "com.foo.AppConfig", CONFIGURATION, None);
    let producer: MethodId = program.add_method(config, "httpClient", &[], "com.foo.http.HttpClient");
    program.method_mut(producer).annotations.push(annotation(BEAN));
    let service = bean_class(&mut program, "com.foo.SyncService", SERVICE, None);
    let field = autowired_field(&mut program, service, "client", "com.foo.http.HttpClient");
    let ret = host_return_var(&program, producer);

    let mut host = MockHost::new(program, session(vec![], TaintConfig::default()));
    let mut plugin = SpringContainerPlugin::new(FanOutPolicy::All);
    let allocated = std::cell::Cell::new(None);
    host.run_with(&mut plugin, |solver| {
        let obj = solver.new_object("com.foo.http.HttpClient");
        solver.add_points_to(cs_var(ret), cs_obj(obj));
        allocated.set(Some(obj));
    });

    let service_obj: CsObj = cs_obj(plugin.registry().objects_of_class(service)[0]);
    assert!(host.solver.pfg_edges.contains(&(
        Pointer::Var(cs_var(ret)),
        Pointer::InstanceField(service_obj, field),
        FlowKind::Other
    )));
    let produced = plugin.registry().by_name("httpClient").unwrap().object();
    let mut expected = vec![cs_obj(produced), cs_obj(allocated.get().unwrap())];
    expected.sort();
    assert_eq!(host.solver.field_points_to(service_obj, field), expected);
    assert!(host.solver.entries.iter().any(|e| e.method == producer));
    assert!(plugin.registry().objects_of_class(client).is_empty());
}

#[test]
fn produced_beans_receive_their_own_injections() {
    let mut program = MemoryProgram::new();
    let repo = bean_class(&mut program, "com.foo.user.UserRepository", REPOSITORY, None);
    let client_class = program.add_class("com.foo.http.HttpClient");
    let field = autowired_field(&mut program, client_class, "repository", "com.foo.user.UserRepository");
    let config = bean_class(&mut program, "com.foo.AppConfig", CONFIGURATION, None);
    let producer = program.add_method(config, "httpClient", &[], "com.foo.http.HttpClient");
    program.method_mut(producer).annotations.push(annotation(BEAN));
    let ret = host_return_var(&program, producer);

    let mut host = MockHost::new(program, session(vec![], TaintConfig::default()));
    let mut plugin = SpringContainerPlugin::new(FanOutPolicy::All);
    host.run(&mut plugin);

    let produced = cs_obj(plugin.registry().by_name("httpClient").unwrap().object());
    let repo_obj = plugin.registry().objects_of_class(repo)[0];
    assert_eq!(host.solver.field_points_to(produced, field), vec![cs_obj(repo_obj)]);
    assert_eq!(host.solver.var_points_to(ret), vec![produced]);
}

#[test]
fn injecting_constructor_is_chosen_next_to_a_no_arg_one() {
    let mut program = MemoryProgram::new();
    let repo = bean_class(&mut program, "com.foo.user.UserRepository", REPOSITORY, None);
    let service = bean_class(&mut program, "com.foo.user.UserService", SERVICE, None);
    program.add_method(service, "<init>", &[], "void");
    let init = program.add_method(service, "<init>", &["com.foo.user.UserRepository"], "void");

    let mut host = MockHost::new(program, session(vec![], TaintConfig::default()));
    let mut plugin = SpringContainerPlugin::new(FanOutPolicy::All);
    host.run(&mut plugin);

    let repo_obj = plugin.registry().objects_of_class(repo)[0];
    let param = host.program.method(init).params[0];
    assert_eq!(host.solver.var_points_to(param), vec![cs_obj(repo_obj)]);
    assert!(host.solver.entries.iter().any(|e| e.method == init));
}

fn host_return_var(program: &MemoryProgram, method: MethodId) -> mscan::ir::program::VarId {
    program.method(method).return_vars[0]
}
