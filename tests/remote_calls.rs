// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

mod common;

use common::*;
use mscan::builder::constant_strings_of_var;
use mscan::builder::dubbo::DubboPlugin;
use mscan::builder::feign::FeignPlugin;
use mscan::builder::grpc::GrpcPlugin;
use mscan::builder::rest_template::RestTemplatePlugin;
use mscan::gateway::endpoint::RouteRewrite;
use mscan::gateway::service::Service;
use mscan::ir::known_names::{GRPC_ABSTRACT_STUB, GRPC_BINDABLE_SERVICE, REST_TEMPLATE_EXCHANGE};
use mscan::ir::memory::MemoryProgram;
use mscan::ir::program::{CallKind, MethodRef, ProgramModel};
use mscan::pta::{FlowKind, Plugin, Pointer, Solver};
use mscan::taint::TaintConfig;

const REST_CONTROLLER: &str = "org.springframework.web.bind.annotation.RestController";
const REQUEST_MAPPING: &str = "org.springframework.web.bind.annotation.RequestMapping";
const GET_MAPPING: &str = "org.springframework.web.bind.annotation.GetMapping";
const FEIGN_CLIENT: &str = "org.springframework.cloud.openfeign.FeignClient";
const DUBBO_SERVICE: &str = "org.apache.dubbo.config.annotation.DubboService";

#[test]
fn feign_call_reaches_the_controller_on_the_same_route() {
    let mut program = MemoryProgram::new();
    let controller = program.add_class("com.foo.user.UserController");
    program.class_mut(controller).annotations.push(annotation(REST_CONTROLLER));
    program
        .class_mut(controller)
        .annotations
        .push(annotation(REQUEST_MAPPING).with_strs("value", &["/users"]));
    let get = program.add_method(controller, "get", &["java.lang.String"], "java.lang.String");
    program
        .method_mut(get)
        .annotations
        .push(annotation(GET_MAPPING).with_strs("value", &["/{id}"]));

    let client = program.add_class("com.foo.order.client.UserClient");
    program.class_mut(client).is_interface = true;
    program
        .class_mut(client)
        .annotations
        .push(annotation(FEIGN_CLIENT).with_str("name", "user"));
    let client_get = program.add_method(client, "get", &["java.lang.String"], "java.lang.String");
    program.method_mut(client_get).is_abstract = true;
    program
        .method_mut(client_get)
        .annotations
        .push(annotation(GET_MAPPING).with_strs("value", &["/users/{id}"]));

    let caller_class = program.add_class("com.foo.order.OrderService");
    let caller = program.add_method(caller_class, "owner", &["java.lang.String"], "java.lang.String");
    let user_id = program.method(caller).params[0];
    let client_ref = MethodRef::new("com.foo.order.client.UserClient", "java.lang.String get(java.lang.String)");
    program.add_call_site(caller, client_ref, CallKind::Interface, None, vec![user_id], None);

    let services = vec![Service::new("user").with_classes(["BOOT-INF/classes/com/foo/user/UserController.class"])];
    let mut host = MockHost::new(program, session(services, TaintConfig::default()));
    let mut plugin = FeignPlugin::new();
    host.run_with(&mut plugin, |solver| solver.reach(caller));

    let signature = host.program.method_signature(client_get);
    assert_eq!(plugin.targets_of(&signature), &[get]);
    assert_eq!(host.solver.edges_to(get), 1);
    assert_eq!(plugin.synthesized_edges(), 1);
    assert!(host.solver.is_reachable(get));
}

#[test]
fn feign_call_without_a_matching_controller_adds_nothing() {
    let mut program = MemoryProgram::new();
    let client = program.add_class("com.foo.order.client.UserClient");
    program.class_mut(client).is_interface = true;
    program.class_mut(client).annotations.push(annotation(FEIGN_CLIENT));
    let client_get = program.add_method(client, "get", &["java.lang.String"], "java.lang.String");
    program.method_mut(client_get).is_abstract = true;
    program
        .method_mut(client_get)
        .annotations
        .push(annotation(GET_MAPPING).with_strs("value", &["/users/{id}"]));
    let caller_class = program.add_class("com.foo.order.OrderService");
    let caller = program.add_method(caller_class, "owner", &["java.lang.String"], "void");
    let user_id = program.method(caller).params[0];
    let client_ref = MethodRef::new("com.foo.order.client.UserClient", "java.lang.String get(java.lang.String)");
    program.add_call_site(caller, client_ref, CallKind::Interface, None, vec![user_id], None);

    let mut host = MockHost::new(program, session(vec![], TaintConfig::default()));
    let mut plugin = FeignPlugin::new();
    host.run_with(&mut plugin, |solver| solver.reach(caller));

    assert!(host.solver.call_edges.is_empty());
    assert_eq!(plugin.synthesized_edges(), 0);
}

#[test]
fn feign_routes_are_rewritten_like_controller_routes() {
    let mut program = MemoryProgram::new();
    let controller = program.add_class("com.foo.yudao.member.controller.app.AppUserController");
    program.class_mut(controller).annotations.push(annotation(REST_CONTROLLER));
    let get = program.add_method(controller, "get", &["java.lang.String"], "java.lang.String");
    program
        .method_mut(get)
        .annotations
        .push(annotation(GET_MAPPING).with_strs("value", &["/user/get"]));

    let client = program.add_class("com.foo.yudao.member.controller.app.UserClient");
    program.class_mut(client).is_interface = true;
    program
        .class_mut(client)
        .annotations
        .push(annotation(FEIGN_CLIENT).with_str("name", "member"));
    let client_get = program.add_method(client, "get", &["java.lang.String"], "java.lang.String");
    program.method_mut(client_get).is_abstract = true;
    program
        .method_mut(client_get)
        .annotations
        .push(annotation(GET_MAPPING).with_strs("value", &["/user/get"]));

    let caller_class = program.add_class("com.foo.yudao.trade.TradeService");
    let caller = program.add_method(caller_class, "buyer", &["java.lang.String"], "void");
    let user_id = program.method(caller).params[0];
    let client_ref = MethodRef::new(
        "com.foo.yudao.member.controller.app.UserClient",
        "java.lang.String get(java.lang.String)",
    );
    program.add_call_site(caller, client_ref, CallKind::Interface, None, vec![user_id], None);

    let host_session = session(vec![], TaintConfig::default());
    assert_eq!(host_session.options.route_rewrite, RouteRewrite::Yudao);
    let mut host = MockHost::new(program, host_session);
    let mut plugin = FeignPlugin::new();
    host.run_with(&mut plugin, |solver| solver.reach(caller));

    let signature = host.program.method_signature(client_get);
    assert_eq!(plugin.targets_of(&signature), &[get]);
    assert_eq!(host.solver.edges_to(get), 1);
}

#[test]
fn dubbo_call_reaches_the_provider_implementation() {
    let mut program = MemoryProgram::new();
    let api = program.add_class("com.foo.api.StockApi");
    program.class_mut(api).is_interface = true;
    let api_count = program.add_method(api, "count", &["java.lang.String"], "int");
    program.method_mut(api_count).is_abstract = true;

    let provider = program.add_class("com.foo.stock.StockApiImpl");
    program.class_mut(provider).interfaces.push(api);
    program.class_mut(provider).annotations.push(annotation(DUBBO_SERVICE));
    let count = program.add_method(provider, "count", &["java.lang.String"], "int");

    let consumer = program.add_class("com.foo.order.OrderService");
    let place = program.add_method(consumer, "place", &["java.lang.String"], "void");
    let sku = program.method(place).params[0];
    program.add_call_site(
        place,
        MethodRef::new("com.foo.api.StockApi", "int count(java.lang.String)"),
        CallKind::Interface,
        None,
        vec![sku],
        None,
    );

    let mut host = MockHost::new(program, session(vec![], TaintConfig::default()));
    let mut plugin = DubboPlugin::new();
    host.run_with(&mut plugin, |solver| solver.reach(place));

    assert_eq!(plugin.providers(), &[provider]);
    assert_eq!(host.solver.edges_to(count), 1);
    assert_eq!(host.solver.edges_to(api_count), 0);
    assert_eq!(host.solver.call_edges[0].kind, CallKind::Interface);
}

#[test]
fn grpc_stub_call_reaches_the_service_method() {
    let mut program = MemoryProgram::new();
    let abstract_stub = program.add_class(GRPC_ABSTRACT_STUB);
    let bindable = program.add_class(GRPC_BINDABLE_SERVICE);
    program.class_mut(bindable).is_interface = true;

    let stub = program.add_class("com.foo.proto.StockGrpc$StockBlockingStub");
    program.class_mut(stub).super_class = Some(abstract_stub);
    let stub_query = program.add_method(stub, "query", &["com.foo.proto.Request"], "com.foo.proto.Reply");

    let base = program.add_class("com.foo.proto.StockGrpc$StockImplBase");
    program.class_mut(base).is_abstract = true;
    program.class_mut(base).interfaces.push(bindable);
    let service = program.add_class("com.foo.stock.StockService");
    program.class_mut(service).super_class = Some(base);
    let query = program.add_method(
        service,
        "query",
        &["com.foo.proto.Request", "io.grpc.stub.StreamObserver"],
        "void",
    );

    let client = program.add_class("com.foo.order.StockClient");
    let lookup = program.add_method(client, "lookup", &["com.foo.proto.Request"], "void");
    let request = program.method(lookup).params[0];
    let call_site = program.add_call(lookup, stub_query, CallKind::Virtual, vec![request]);

    let mut host = MockHost::new(program, session(vec![], TaintConfig::default()));
    let mut plugin = GrpcPlugin::new();
    host.run_with(&mut plugin, |solver| solver.reach(lookup));

    assert_eq!(plugin.callees_of(call_site), &[query]);
    assert_eq!(host.solver.edges_to(query), 1);
    let param = host.program.method(query).params[0];
    assert!(host.solver.pfg_edges.contains(&(
        Pointer::Var(cs_var(request)),
        Pointer::Var(cs_var(param)),
        FlowKind::ParameterPassing
    )));
}

#[test]
fn rest_template_exchange_reaches_the_formatted_route() {
    let mut program = MemoryProgram::new();
    let string_class = program.add_class("java.lang.String");
    program.class_mut(string_class).is_application = false;
    let format = program.add_method(
        string_class,
        "format",
        &["java.lang.String", "java.lang.Object[]"],
        "java.lang.String",
    );
    program.method_mut(format).is_static = true;

    let template_class = program.add_class("org.springframework.web.client.RestTemplate");
    program.class_mut(template_class).is_application = false;
    let exchange = program.add_method(
        template_class,
        "exchange",
        &[
            "java.lang.String",
            "org.springframework.http.HttpMethod",
            "org.springframework.http.HttpEntity",
            "java.lang.Class",
            "java.lang.Object[]",
        ],
        "org.springframework.http.ResponseEntity",
    );
    assert_eq!(program.method_signature(exchange), REST_TEMPLATE_EXCHANGE[2]);

    let controller = program.add_class("com.foo.stock.StockController");
    program.class_mut(controller).annotations.push(annotation(REST_CONTROLLER));
    let list = program.add_method(controller, "list", &["java.lang.String"], "java.lang.String");
    program
        .method_mut(list)
        .annotations
        .push(annotation(GET_MAPPING).with_strs("value", &["/stock/list"]));

    let client = program.add_class("com.foo.order.StockClient");
    let fetch = program.add_method(client, "fetch", &["org.springframework.http.HttpEntity"], "void");
    let body = program.method(fetch).params[0];
    let template = program.add_const_var(fetch, "%s/stock/%s");
    let parts = program.add_var(fetch, "parts", "java.lang.Object[]");
    let part = program.add_const_var(fetch, "list");
    program.add_array_store(fetch, parts, part);
    let url = program.add_var(fetch, "url", "java.lang.String");
    let format_ref = MethodRef::parse(&program.method_signature(format)).unwrap();
    program.add_call_site(fetch, format_ref, CallKind::Static, Some(format), vec![template, parts], Some(url));
    let http_method = program.add_var(fetch, "method", "org.springframework.http.HttpMethod");
    let reply_type = program.add_var(fetch, "type", "java.lang.Class");
    let uri_vars = program.add_var(fetch, "uriVars", "java.lang.Object[]");
    program.add_call(
        fetch,
        exchange,
        CallKind::Virtual,
        vec![url, http_method, body, reply_type, uri_vars],
    );

    let services = vec![Service::new("stock").with_classes(["com/foo/stock/StockController.class"])];
    let mut host = MockHost::new(program, session(services, TaintConfig::default()));
    let mut plugin = RestTemplatePlugin::new();
    host.run_with(&mut plugin, |solver| {
        solver.reach(fetch);
        let array = solver.new_object("java.lang.Object[]");
        solver.add_points_to(cs_var(parts), cs_obj(array));
    });

    assert_eq!(host.solver.edges_to(list), 1);
    let edge = host.solver.call_edges.iter().find(|e| e.callee.method == list).unwrap();
    assert_eq!(edge.kind, CallKind::Other);
    assert_eq!(plugin.synthesized_edges(), 1);
    let param = host.program.method(list).params[0];
    assert!(host.solver.pfg_edges.contains(&(
        Pointer::Var(cs_var(body)),
        Pointer::Var(cs_var(param)),
        FlowKind::ParameterPassing
    )));
    assert!(constant_strings_of_var(&host.solver, cs_var(url)).contains("mock:/stock/list"));
}
